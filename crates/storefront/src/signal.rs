//! Slice subscriptions over store state.
//!
//! Stores publish their whole state on a `watch` channel. UI components that
//! only care about part of it (the cart badge count, the current checkout
//! step) subscribe to a projection so they wake only when that part changes.

use tokio::sync::watch;

/// Project a state channel onto a derived value.
///
/// The returned receiver is updated only when the projected value changes.
/// The forwarding task ends when the source store is dropped or every
/// receiver of the projection is gone. Must be called inside a Tokio runtime.
pub fn project<S, T, F>(mut source: watch::Receiver<S>, f: F) -> watch::Receiver<T>
where
    S: Send + Sync + 'static,
    T: PartialEq + Send + Sync + 'static,
    F: Fn(&S) -> T + Send + 'static,
{
    let initial = f(&source.borrow_and_update());
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = source.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = f(&source.borrow_and_update());
                    tx.send_if_modified(|current| {
                        if *current == next {
                            false
                        } else {
                            *current = next;
                            true
                        }
                    });
                }
                () = tx.closed() => break,
            }
        }
    });

    rx
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[derive(Debug)]
    struct State {
        count: u32,
        label: &'static str,
    }

    #[tokio::test]
    async fn test_projection_ignores_unrelated_changes() {
        let (tx, rx) = watch::channel(State {
            count: 1,
            label: "a",
        });
        let mut counts = project(rx, |s| s.count);
        assert_eq!(*counts.borrow(), 1);

        tx.send_modify(|s| s.label = "b");
        let woke = tokio::time::timeout(Duration::from_millis(50), counts.changed()).await;
        assert!(woke.is_err(), "label change must not wake count subscribers");

        tx.send_modify(|s| s.count = 2);
        tokio::time::timeout(Duration::from_secs(1), counts.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*counts.borrow(), 2);
    }

    #[tokio::test]
    async fn test_projection_closes_with_source() {
        let (tx, rx) = watch::channel(State {
            count: 0,
            label: "a",
        });
        let mut counts = project(rx, |s| s.count);
        drop(tx);
        let result = tokio::time::timeout(Duration::from_secs(1), counts.changed())
            .await
            .unwrap();
        assert!(result.is_err());
    }
}
