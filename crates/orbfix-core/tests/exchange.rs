mod common;

use common::MockSerial;
use orbfix_core::protocol::{
    decode, encode, exchange::exchange_once, send_and_receive, Channel, CommandRequest,
    ExchangeConfig, ProtocolError,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn quick_config(retries: u32) -> ExchangeConfig {
    ExchangeConfig {
        overall_wait: Duration::from_millis(150),
        retries,
        ..ExchangeConfig::default()
    }
}

#[test]
fn test_silent_transport_exhausts_retries() {
    let mut opened = 0u32;
    let mut opener = |attempt: u32| -> Result<Box<dyn Channel>, ProtocolError> {
        opened += 1;
        assert_eq!(attempt, opened);
        Ok(Box::new(MockSerial::new()))
    };

    let request = CommandRequest::new(0x0001, 0x6A, Vec::new());
    let frames = send_and_receive(&mut opener, &request, &quick_config(2)).unwrap();
    assert!(frames.is_empty());
    assert_eq!(opened, 3);
}

#[test]
fn test_response_is_collected() {
    let mock = MockSerial::with_responder(|sent| {
        let request = decode(sent).unwrap();
        let mut reply = b"$GPGGA,noise*00\r\n".to_vec();
        reply.extend(encode(request.command_id, 0x6A, &[1, 2, 3]).unwrap());
        reply
    });
    let handle = mock.clone();
    let mut opener = move |_: u32| -> Result<Box<dyn Channel>, ProtocolError> {
        Ok(Box::new(mock.clone()))
    };

    let request = CommandRequest::new(0x0001, 0x6A, vec![0xAA]);
    let frames = send_and_receive(&mut opener, &request, &quick_config(1)).unwrap();

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command_id, 0x0001);
    assert_eq!(frames[0].payload, vec![1, 2, 3]);
    assert_eq!(handle.writes(), vec![request.encode().unwrap()]);
}

#[test]
fn test_second_attempt_succeeds() {
    let mut opener = |attempt: u32| -> Result<Box<dyn Channel>, ProtocolError> {
        if attempt == 1 {
            return Ok(Box::new(MockSerial::new()));
        }
        Ok(Box::new(MockSerial::with_responder(|_| {
            encode(0x0004, 0x7A, &[0x42]).unwrap()
        })))
    };

    let request = CommandRequest::new(0x0004, 0x7A, Vec::new());
    let frames = send_and_receive(&mut opener, &request, &quick_config(1)).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, vec![0x42]);
}

#[test]
fn test_invalid_frames_are_skipped() {
    let mock = MockSerial::with_responder(|_| {
        let mut bad = encode(0x0001, 0x6A, &[9]).unwrap();
        bad[2] ^= 0x01;
        let mut reply = bad;
        reply.extend(encode(0x0001, 0x6B, &[7]).unwrap());
        reply
    });
    let mut channel = mock;
    let encoded = encode(0x0001, 0x6A, &[]).unwrap();

    let frames = exchange_once(&mut channel, &encoded, &quick_config(0)).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].subsystem_id, 0x6B);
}

#[test]
fn test_missing_device_is_not_retried() {
    let mut calls = 0;
    let mut opener = |_: u32| -> Result<Box<dyn Channel>, ProtocolError> {
        calls += 1;
        Err(ProtocolError::DeviceNotFound("0483:5740".into()))
    };

    let request = CommandRequest::new(0x0001, 0x6A, Vec::new());
    let err = send_and_receive(&mut opener, &request, &quick_config(3)).unwrap_err();
    assert!(matches!(err, ProtocolError::DeviceNotFound(_)));
    assert_eq!(calls, 1);
}

#[test]
fn test_persistent_write_failure_is_returned() {
    let mut calls = 0;
    let mut opener = |_: u32| -> Result<Box<dyn Channel>, ProtocolError> {
        calls += 1;
        let mock = MockSerial::new();
        mock.set_fail_on_send(true);
        Ok(Box::new(mock))
    };

    let request = CommandRequest::new(0x0001, 0x6A, Vec::new());
    let err = send_and_receive(&mut opener, &request, &quick_config(1)).unwrap_err();
    assert!(matches!(err, ProtocolError::IoError(_)));
    assert!(err.is_retryable());
    assert_eq!(calls, 2);
}

#[test]
fn test_frames_survive_a_failed_read() {
    let mock = MockSerial::with_responder(|_| encode(0x0001, 0x6A, &[7]).unwrap());
    mock.set_fail_when_empty(true);
    let handle = mock.clone();
    let mut opened = 0;
    let mut opener = |_: u32| -> Result<Box<dyn Channel>, ProtocolError> {
        opened += 1;
        Ok(Box::new(mock.clone()))
    };

    let request = CommandRequest::new(0x0001, 0x6A, Vec::new());
    let frames = send_and_receive(&mut opener, &request, &quick_config(1)).unwrap();

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, vec![7]);
    assert_eq!(opened, 1);
    assert_eq!(handle.writes().len(), 1);
}

#[test]
fn test_failed_read_without_frames_is_an_error() {
    let mut opener = |_: u32| -> Result<Box<dyn Channel>, ProtocolError> {
        let mock = MockSerial::new();
        mock.set_fail_when_empty(true);
        Ok(Box::new(mock))
    };

    let request = CommandRequest::new(0x0001, 0x6A, Vec::new());
    let err = send_and_receive(&mut opener, &request, &quick_config(1)).unwrap_err();
    assert!(matches!(err, ProtocolError::IoError(_)));
}
