use lightctl_hardware::HwError;
use lightctl_hardware::util::{LineBuffer, MAX_LINE_BYTES};
use rstest::rstest;

#[test]
fn partial_lines_wait_for_terminator() {
    let mut buf = LineBuffer::new();
    buf.extend(b"Sal").unwrap();
    assert_eq!(buf.pop_line(), None);
    buf.extend(b"ve;PATTERN_LENGTH:8\r\nArriv").unwrap();
    assert_eq!(buf.pop_line().as_deref(), Some("Salve;PATTERN_LENGTH:8"));
    assert_eq!(buf.pop_line(), None);
    assert!(!buf.is_empty());
    buf.extend(b"ederci\n").unwrap();
    assert_eq!(buf.pop_line().as_deref(), Some("Arrivederci"));
    assert!(buf.is_empty());
}

#[rstest]
#[case(b"\n\r\n  \nok\n", "ok")]
#[case(b"  padded  \n", "padded")]
fn blank_lines_are_skipped(#[case] input: &[u8], #[case] expected: &str) {
    let mut buf = LineBuffer::new();
    buf.extend(input).unwrap();
    assert_eq!(buf.pop_line().as_deref(), Some(expected));
    assert_eq!(buf.pop_line(), None);
}

#[test]
fn runaway_line_is_rejected_and_cleared() {
    let mut buf = LineBuffer::new();
    let junk = vec![b'x'; MAX_LINE_BYTES + 1];
    let err = buf.extend(&junk).expect_err("expected overflow");
    assert!(matches!(err, HwError::LineTooLong(_)));
    assert!(buf.is_empty());
}
