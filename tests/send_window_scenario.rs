//! Scenario 3 from spec.md §8: with `k=1`, two consecutive sends before
//! any confirmation overflow the send window; the second is deferred,
//! then transmitted once the first is acknowledged.

use iec60870::apci::SendWindow;
use iec60870::queue::HighPrioQueue;

#[test]
fn k_buffer_overflow_defers_second_send_until_first_is_acked() {
    let mut window = SendWindow::new(1);
    let mut pending = HighPrioQueue::new(4);

    assert!(!window.is_full());
    let first_seq = window.record_sent(None);
    assert!(window.is_full());

    // A second send can't go out while the window is full; it's
    // deferred into the high-priority queue instead.
    let second_bytes = vec![0xAA, 0xBB];
    pending.enqueue(second_bytes.clone()).expect("high-prio queue has room");
    assert_eq!(pending.len(), 1);

    // The slave acknowledges the first read: N(R) is the next-expected
    // sequence number, one past the N(S) that was actually sent.
    window.confirm(first_seq + 1).unwrap();
    assert!(!window.is_full());

    // Now the deferred send can be dequeued and transmitted.
    let to_send = pending.dequeue().expect("deferred ASDU still queued");
    assert_eq!(to_send, second_bytes);
    window.record_sent(None);
    assert!(window.is_full());
}
