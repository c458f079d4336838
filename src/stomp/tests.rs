use super::*;
use std::time::Duration;

#[test]
fn test_encode_subscribe_frame() {
    let frame = Frame::subscribe("sub-0", "/topic/tasks");
    assert_eq!(
        frame.encode(),
        "SUBSCRIBE\nid:sub-0\ndestination:/topic/tasks\nack:auto\n\n\0"
    );
}

#[test]
fn test_encode_adds_content_length_for_body() {
    let frame = Frame::new(Command::Send)
        .with_header("destination", "/app/echo")
        .with_body("{\"a\":1}");
    let text = frame.encode();
    assert!(text.contains("content-length:7\n"));
    assert!(text.ends_with("\n\n{\"a\":1}\0"));
}

#[test]
fn test_connect_frame_headers_are_not_escaped() {
    let frame = Frame::connect("localhost", Heartbeat::new(Duration::from_secs(10), Duration::ZERO));
    let text = frame.encode();
    assert!(text.starts_with("CONNECT\n"));
    assert!(text.contains("accept-version:1.2,1.1,1.0\n"));
    assert!(text.contains("heart-beat:10000,0\n"));
}

#[test]
fn test_decode_message_frame() {
    let text = "MESSAGE\ndestination:/topic/tasks\nsubscription:sub-0\nmessage-id:m-1\n\n{\"id\":\"t1\"}\0";
    let frames = decode_frames(text).unwrap();
    assert_eq!(frames.len(), 1);

    let frame = &frames[0];
    assert_eq!(frame.command, Command::Message);
    assert_eq!(frame.header("destination"), Some("/topic/tasks"));
    assert_eq!(frame.header("subscription"), Some("sub-0"));
    assert_eq!(frame.header("message-id"), Some("m-1"));
    assert_eq!(frame.body, "{\"id\":\"t1\"}");
}

#[test]
fn test_decode_with_crlf_line_endings() {
    let text = "CONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0";
    let frames = decode_frames(text).unwrap();
    assert_eq!(frames[0].command, Command::Connected);
    assert_eq!(frames[0].header("version"), Some("1.2"));
}

#[test]
fn test_heartbeat_only_message_is_empty() {
    assert!(decode_frames("\n").unwrap().is_empty());
    assert!(decode_frames("\r\n\n").unwrap().is_empty());
}

#[test]
fn test_decode_multiple_frames_with_heartbeats_between() {
    let text = "RECEIPT\nreceipt-id:r-1\n\n\0\n\nMESSAGE\ndestination:/topic/a\n\nx\0";
    let frames = decode_frames(text).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].command, Command::Receipt);
    assert_eq!(frames[1].command, Command::Message);
    assert_eq!(frames[1].body, "x");
}

#[test]
fn test_content_length_allows_nul_in_body() {
    let text = "MESSAGE\ndestination:/topic/a\ncontent-length:3\n\na\0b\0";
    let frames = decode_frames(text).unwrap();
    assert_eq!(frames[0].body, "a\0b");
}

#[test]
fn test_repeated_header_first_wins() {
    let text = "MESSAGE\ndestination:/topic/a\ndestination:/topic/b\n\n\0";
    let frames = decode_frames(text).unwrap();
    assert_eq!(frames[0].header("destination"), Some("/topic/a"));
}

#[test]
fn test_header_escaping_survives_the_wire() {
    let frame = Frame::new(Command::Message)
        .with_header("destination", "/topic/a:b")
        .with_header("note", "line1\nline2\\");
    let encoded = frame.encode();
    assert!(encoded.contains("destination:/topic/a\\cb\n"));

    let decoded = decode_frames(&encoded).unwrap();
    assert_eq!(decoded[0].header("destination"), Some("/topic/a:b"));
    assert_eq!(decoded[0].header("note"), Some("line1\nline2\\"));
}

#[test]
fn test_invalid_escape_is_rejected() {
    let text = "MESSAGE\ndestination:/topic\\t\n\n\0";
    match decode_frames(text) {
        Err(FrameError::InvalidEscape(_)) => {}
        other => panic!("Expected InvalidEscape, got {:?}", other),
    }
}

#[test]
fn test_unknown_command_is_rejected() {
    let err = decode_frames("BOGUS\n\n\0").unwrap_err();
    assert_eq!(err, FrameError::UnknownCommand("BOGUS".to_string()));
}

#[test]
fn test_missing_terminator_is_rejected() {
    assert_eq!(
        decode_frames("MESSAGE\ndestination:/a\n\nbody").unwrap_err(),
        FrameError::Unterminated
    );
    assert_eq!(
        decode_frames("MESSAGE\ncontent-length:10\n\nshort\0").unwrap_err(),
        FrameError::Unterminated
    );
}

#[test]
fn test_oversized_content_length_is_rejected() {
    let text = format!("MESSAGE\ncontent-length:{}\n\nx\0", usize::MAX);
    assert_eq!(
        decode_frames(&text).unwrap_err(),
        FrameError::InvalidContentLength(usize::MAX.to_string())
    );

    // Larger than the frame but representable
    assert_eq!(
        decode_frames("MESSAGE\ncontent-length:4096\n\nx\0").unwrap_err(),
        FrameError::Unterminated
    );
}

#[test]
fn test_malformed_header_line() {
    let err = decode_frames("MESSAGE\nno-colon-here\n\n\0").unwrap_err();
    assert_eq!(err, FrameError::MalformedHeader("no-colon-here".to_string()));
}

#[test]
fn test_heartbeat_parse_and_display() {
    let hb = Heartbeat::parse("10000, 5000").unwrap();
    assert_eq!(hb.outgoing, Duration::from_millis(10000));
    assert_eq!(hb.incoming, Duration::from_millis(5000));
    assert_eq!(hb.to_string(), "10000,5000");
    assert!(Heartbeat::parse("garbage").is_none());
}

#[test]
fn test_heartbeat_negotiation() {
    let client = Heartbeat::new(Duration::from_millis(10000), Duration::from_millis(10000));

    // Server that cannot heart-beat disables both directions
    let negotiated = Heartbeat::negotiate(client, Heartbeat::default());
    assert_eq!(negotiated, Heartbeat::default());

    // Slower side wins
    let server = Heartbeat::new(Duration::from_millis(20000), Duration::from_millis(5000));
    let negotiated = Heartbeat::negotiate(client, server);
    assert_eq!(negotiated.outgoing, Duration::from_millis(10000));
    assert_eq!(negotiated.incoming, Duration::from_millis(20000));
}
