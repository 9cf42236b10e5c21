//! Basic groutine example
//!
//! Spawns a handful of routines across a small worker pool and has each
//! yield a few times before finishing.
//!
//! # Environment Variables
//!
//! Configuration:
//! - `GVT_WORKERS=<n>` - Number of scheduler threads (default: 4)
//! - `GVT_ROUTINES=<n>` - Number of routines to spawn (default: 3)
//! - `GVT_YIELDS=<n>` - Number of yields per routine (default: 3)
//!
//! Logging:
//! - `GROUTINE_LOG_LEVEL=<level>` - Log level: off, error, warn, info, debug, trace
//! - `GVT_DEBUG=1` - Enable scheduler debug logging

use groutine::{current_id, env_get, env_get_bool, kdebug, kinfo, run, start, yield_now};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn main() {
    println!("=== groutine Basic Example ===\n");

    let num_workers: usize = env_get("GVT_WORKERS", 4);
    let num_routines: usize = env_get("GVT_ROUTINES", 3);
    let num_yields: usize = env_get("GVT_YIELDS", 3);
    let debug_logging: bool = env_get_bool("GVT_DEBUG", false);

    if debug_logging {
        groutine::init_logging();
        groutine::set_log_level(groutine::LogLevel::Debug);
    }

    println!("Configuration:");
    println!("  Workers: {num_workers}");
    println!("  Routines: {num_routines}, yields per routine: {num_yields}");
    println!();

    let completed = Arc::new(AtomicUsize::new(0));

    run(num_workers, move || {
        kinfo!("spawning {} routines", num_routines);

        for i in 1..=num_routines {
            let c = completed.clone();
            let yields = num_yields;
            let id = start(move || {
                kdebug!("routine {} ({:?}) started", i, current_id());
                for j in 0..yields {
                    kdebug!("routine {} iteration {}", i, j);
                    yield_now();
                }
                kdebug!("routine {} finished", i);
                c.fetch_add(1, Ordering::SeqCst);
            });
            println!("Spawned routine {i} (id={id:?})");
        }

        while completed.load(Ordering::SeqCst) < num_routines {
            yield_now();
        }
        kinfo!("{}/{} routine(s) completed", completed.load(Ordering::SeqCst), num_routines);
    });

    println!("\n=== Example Complete ===");
}
