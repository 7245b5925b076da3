//! CONTEXT: Status-word packing checks for the wait emulation
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 3 integration tests
//!
//! TEST_SCENARIOS:
//!   - test_host_status_lands_in_exit_byte(): WEXITSTATUS sees the host value
//!   - test_host_status_is_truncated_to_low_byte(): upper host bits are dropped
//!   - test_signal_bits_never_populated(): WIFEXITED is always true
use procbridge_abi::WaitStatus;

#[test]
fn host_status_lands_in_exit_byte() {
    let status = WaitStatus::from_host(42);
    assert_eq!(status.raw(), 42 << 8);
    assert_eq!(status.exit_status(), 42);
}

#[test]
fn host_status_is_truncated_to_low_byte() {
    let status = WaitStatus::from_host(0x1_07);
    assert_eq!(status.exit_status(), 7);
    assert_eq!(WaitStatus::from_host(-1).exit_status(), 0xff);
}

#[test]
fn signal_bits_never_populated() {
    for raw in [0, 1, 127, 128, 255, 256] {
        assert!(WaitStatus::from_host(raw).exited());
    }
}
