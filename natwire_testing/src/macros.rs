//! Assertion macros shared by integration tests.

/// Await the next message on a subscription, panicking with the call site if
/// nothing arrives within the window (one second unless given).
#[macro_export]
macro_rules! next_expect {
    ($sub:expr) => {
        $crate::next_expect!($sub, ::std::time::Duration::from_secs(1))
    };
    ($sub:expr, $within:expr) => {{
        ::tokio::time::timeout($within, $sub.next_message())
            .await
            .expect(concat!("no message in time at ", file!(), ":", line!()))
            .expect(concat!("subscription ended at ", file!(), ":", line!()))
    }};
}

/// Await an event matching `$pat`, skipping others, panicking with the call
/// site if none arrives within one second.
#[macro_export]
macro_rules! event_expect {
    ($events:expr, $pat:pat) => {{
        ::tokio::time::timeout(::std::time::Duration::from_secs(1), async {
            loop {
                match $events.recv().await {
                    Ok(event @ $pat) => break event,
                    Ok(_) | Err(::tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(err) => panic!("event stream ended: {err}"),
                }
            }
        })
        .await
        .expect(concat!("no matching event at ", file!(), ":", line!()))
    }};
}

pub use crate::{event_expect, next_expect};
