//! Channel communication example
//!
//! Demonstrates inter-routine communication using a bounded channel: a
//! producer routine fills it, a consumer routine drains it.

use groutine::{channel, run, start};

fn main() {
    println!("=== groutine Channel Example ===\n");

    run(4, || {
        let (tx, rx) = channel::<i32>(10);

        println!("Created channel with capacity 10\n");

        start(move || {
            println!("[Producer] Starting...");
            for i in 1..=5 {
                match tx.send(i) {
                    Ok(()) => println!("[Producer] Sent: {i}"),
                    Err(e) => println!("[Producer] Failed to send {i}: {e:?}"),
                }
            }
            println!("[Producer] Done!");
        });

        start(move || {
            println!("[Consumer] Starting...");
            for _ in 0..5 {
                match rx.recv() {
                    Ok(val) => println!("[Consumer] Received: {val}"),
                    Err(e) => {
                        println!("[Consumer] Channel closed: {e:?}");
                        break;
                    }
                }
            }
            println!("[Consumer] Done!");
        });
    });

    println!("\n=== Example Complete ===");
}
