//! Counter Example - state, effects and priorities on the in-memory host
//!
//! This example walks one component through its life:
//! - Mounting a counter and printing the host markup
//! - Clicking the button a few times (batched into one pass)
//! - A low-priority background task that yields between slices
//! - An immediate update that commits before returning
//!
//! Set `RUST_LOG=spark_fiber=debug` to watch the scheduler work.
//!
//! Run with: cargo run --example counter

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use spark_fiber::{
    Component, Deps, Element, EventHandler, EventLoop, MemorySurface, Priority, Scheduler, SetState,
    TaskStatus, Value, h, mount, text,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== spark-fiber Counter Example ===\n");

    let surface = MemorySurface::new();
    let event_loop = EventLoop::manual();
    let scheduler = Scheduler::new(surface.clone(), event_loop.clone());
    let root = surface.create_container("app");

    // The component publishes its setter so main can drive it directly
    let setter: Rc<RefCell<Option<SetState<i64>>>> = Rc::new(RefCell::new(None));
    let published = setter.clone();
    let counter = Component::new("Counter", move |cx, _| {
        let (count, set_count) = cx.use_state(0i64);
        *published.borrow_mut() = Some(set_count.clone());

        cx.use_effect(Deps::on([Value::from(count)]), move || {
            println!("  effect: count is now {count}");
            Some(Box::new(move || println!("  cleanup: count was {count}")))
        });

        let on_click = EventHandler::new(move || set_count.update(|n| n + 1));
        vec![
            h("p").attr("class", "label").text_child("Clicks:"),
            h("span").attr("id", "count").child(text(count)),
            h("button").on("click", on_click).text_child("+1"),
        ]
    });

    // -------------------------------------------------------------------------
    // Mount
    // -------------------------------------------------------------------------
    let handle = mount(&scheduler, Element::component(&counter), root)?;
    println!("mounted:  {}\n", surface.render_to_string(root));

    // -------------------------------------------------------------------------
    // Clicks: three updates, one pass
    // -------------------------------------------------------------------------
    let button = surface.children(root)[2];
    for _ in 0..3 {
        surface.dispatch(button, "click");
    }
    println!("after clicks, before the host turn: {}", surface.inner_markup(root));
    event_loop.run_until_idle();
    println!("after the host turn:                {}\n", surface.inner_markup(root));

    // -------------------------------------------------------------------------
    // Background work yields between slices
    // -------------------------------------------------------------------------
    event_loop.set_auto_advance(Duration::from_millis(2));
    let mut remaining = 5;
    scheduler.schedule_task(Priority::Low, move |cx| {
        println!("  background slice at {:?}", cx.now());
        remaining -= 1;
        Ok(if remaining == 0 {
            TaskStatus::Complete
        } else {
            TaskStatus::Continue
        })
    });
    let turns = event_loop.run_until_idle();
    event_loop.set_auto_advance(Duration::ZERO);
    println!("background task finished after {turns} host turns\n");

    // -------------------------------------------------------------------------
    // Immediate update: committed before `set_with_priority` returns
    // -------------------------------------------------------------------------
    let set_count = setter.borrow().clone();
    if let Some(set_count) = set_count {
        set_count.set_with_priority(Priority::Immediate, 100);
    }
    println!("immediate: {}\n", surface.inner_markup(root));

    let stats = scheduler.stats();
    println!(
        "passes started: {}, commits: {}, discarded: {}, yields: {}",
        stats.passes_started, stats.commits, stats.passes_discarded, stats.yields
    );

    handle.unmount()?;
    println!("unmounted: {}", surface.render_to_string(root));
    println!("released {} detached host nodes", surface.prune_detached());
    Ok(())
}
