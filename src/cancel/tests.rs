use super::*;
use crate::util::test::{assert_future, assert_send_sync};

#[test]
fn cancel_signal_is_send_and_sync() {
    assert_send_sync::<CancelSignal>();
}

#[test]
fn wait_for_cancel_is_send_and_sync() {
    assert_send_sync::<WaitForCancel<'_>>();
}

#[test]
fn futures_are_futures() {
    assert_future::<WaitForCancel<'_>>();
    assert_future::<Cancellable<'_, core::future::Ready<()>>>();
}
