mod common;

use std::thread;
use std::time::Duration;

use alup_core::{Link, Session};
use alup_proto::{AckStatus, Color, Command, Frame};
use common::{controller_handshake, loopback_pair, now_ms, recv_data_frame, send_ack, test_config};

/// S1. Connect, send one frame, expect exactly one ACK, empty pipeline,
/// positive latency.
#[test]
fn s1_basic_round_trip_completes_with_positive_latency() {
    let (host_link, mut controller_link) = loopback_pair();
    let config = test_config();

    let controller = {
        let config = config.clone();
        thread::spawn(move || {
            controller_handshake(&mut controller_link, &config);
            let frame = recv_data_frame(&mut controller_link);
            send_ack(&mut controller_link, frame.sequence, AckStatus::Ok, now_ms() + 1000, now_ms() + 1001);
        })
    };

    let session = Session::connect(Box::new(host_link), Duration::from_secs(2)).unwrap();
    assert_eq!(session.configuration().led_count, config.led_count);
    assert_eq!(session.configuration().frame_buffer_size, config.frame_buffer_size);

    let completed = session.set_colors(vec![Color::new(255, 0, 0)]).unwrap();
    assert_eq!(completed.status, AckStatus::Ok);
    assert!(session.last_latency_ms() >= 0);

    session.flush_buffer().unwrap();
    controller.join().unwrap();
}

/// P9. The handshake surface matches what the scripted controller sent.
#[test]
fn p9_handshake_surface_matches_scripted_controller() {
    let (host_link, mut controller_link) = loopback_pair();
    let mut config = test_config();
    config.device_name = "unit-test-strip".into();
    config.led_count = 42;
    config.frame_buffer_size = 7;

    let controller = {
        let config = config.clone();
        thread::spawn(move || controller_handshake(&mut controller_link, &config))
    };

    let session = Session::connect(Box::new(host_link), Duration::from_secs(2)).unwrap();
    assert_eq!(session.configuration().device_name, "unit-test-strip");
    assert_eq!(session.configuration().led_count, 42);
    assert_eq!(session.configuration().frame_buffer_size, 7);
    controller.join().unwrap();
}

/// P5. Timestamp rewrite identity: zero stays zero; a nonzero host
/// timestamp gets `deltaMedian` added.
#[test]
fn p5_timestamp_rewrite_identity_on_the_wire() {
    let (host_link, mut controller_link) = loopback_pair();
    let config = test_config();

    let controller = {
        let config = config.clone();
        thread::spawn(move || {
            controller_handshake(&mut controller_link, &config);
            // First frame: zero timestamp, must stay zero on the wire.
            let frame = recv_data_frame(&mut controller_link);
            assert_eq!(frame.timestamp, 0);
            send_ack(&mut controller_link, frame.sequence, AckStatus::Ok, now_ms(), now_ms());

            // Second frame: nonzero timestamp with no calibration yet
            // (deltaMedian == 0), so it should round-trip unchanged.
            let frame = recv_data_frame(&mut controller_link);
            assert_eq!(frame.timestamp, 5_000);
            send_ack(&mut controller_link, frame.sequence, AckStatus::Ok, now_ms(), now_ms());
        })
    };

    let session = Session::connect(Box::new(host_link), Duration::from_secs(2)).unwrap();

    let mut zero_frame = Frame::new();
    zero_frame.timestamp = 0;
    session.send(zero_frame).unwrap();
    assert_eq!(session.time_delta_ms(), 0);

    let mut scheduled_frame = Frame::new();
    scheduled_frame.timestamp = 5_000;
    session.send(scheduled_frame).unwrap();

    controller.join().unwrap();
}

/// S5. Controller returns `status = ERROR` on the third frame; it
/// surfaces as `PROTOCOL_ERROR` but the session stays usable.
#[test]
fn s5_controller_error_status_is_protocol_error_but_session_stays_ready() {
    let (host_link, mut controller_link) = loopback_pair();
    let config = test_config();

    let controller = {
        let config = config.clone();
        thread::spawn(move || {
            controller_handshake(&mut controller_link, &config);
            for i in 0..4 {
                let frame = recv_data_frame(&mut controller_link);
                let status = if i == 2 { AckStatus::Error } else { AckStatus::Ok };
                send_ack(&mut controller_link, frame.sequence, status, now_ms(), now_ms());
            }
        })
    };

    let session = Session::connect(Box::new(host_link), Duration::from_secs(2)).unwrap();

    assert!(session.send(Frame::new()).is_ok());
    assert!(session.send(Frame::new()).is_ok());

    let err = session.send(Frame::new()).unwrap_err();
    assert!(matches!(err, alup_core::SessionError::ProtocolError { .. }));

    // the session is still open: a fourth frame succeeds.
    assert!(session.send(Frame::new()).is_ok());

    controller.join().unwrap();
}

/// S6. Controller stops responding mid-stream: the pending `send` times
/// out and the session closes.
#[test]
fn s6_unresponsive_controller_times_out_and_closes_the_session() {
    let (host_link, mut controller_link) = loopback_pair();
    let config = test_config();

    let controller = {
        let config = config.clone();
        thread::spawn(move || {
            controller_handshake(&mut controller_link, &config);
            let _frame = recv_data_frame(&mut controller_link);
            // never sends the ACK; keep the thread alive long enough for
            // the session's deadline to expire.
            thread::sleep(Duration::from_millis(600));
        })
    };

    let session = Session::connect(Box::new(host_link), Duration::from_millis(200)).unwrap();
    let err = session.send(Frame::new()).unwrap_err();
    assert!(matches!(err, alup_core::SessionError::Timeout));

    let err2 = session.send(Frame::new()).unwrap_err();
    assert!(matches!(err2, alup_core::SessionError::LinkClosed));

    controller.join().unwrap();
}

/// P1/P2. The pipeline never holds more than `frameBufferSize` frames
/// in flight: once every slot is occupied by a frame the controller
/// hasn't acked yet, a non-blocking send is rejected with
/// `BUFFER_FULL`, and the slot frees (allowing a new send) only once an
/// ACK lands.
#[test]
fn p1_p2_pipeline_bound_is_enforced() {
    let (host_link, mut controller_link) = loopback_pair();
    let mut config = test_config();
    config.frame_buffer_size = 2;

    let controller = {
        let config = config.clone();
        thread::spawn(move || {
            controller_handshake(&mut controller_link, &config);
            let first = recv_data_frame(&mut controller_link);
            let second = recv_data_frame(&mut controller_link);
            assert_ne!(first.sequence, second.sequence);
            // hold both ACKs until released below, simulating a pipeline
            // that's genuinely full.
            std::thread::sleep(Duration::from_millis(120));
            send_ack(&mut controller_link, first.sequence, AckStatus::Ok, now_ms(), now_ms());
            send_ack(&mut controller_link, second.sequence, AckStatus::Ok, now_ms(), now_ms());
            let third = recv_data_frame(&mut controller_link);
            send_ack(&mut controller_link, third.sequence, AckStatus::Ok, now_ms(), now_ms());
        })
    };

    let session = Session::connect(Box::new(host_link), Duration::from_secs(2)).unwrap();

    thread::scope(|scope| {
        let h1 = scope.spawn(|| session.send(Frame::new()));
        let h2 = scope.spawn(|| session.send(Frame::new()));

        // give both reservations time to land before the buffer-full
        // probe below.
        thread::sleep(Duration::from_millis(40));
        let rejected = session.try_send(Frame::new());
        assert!(matches!(rejected, Err(alup_core::SessionError::BufferFull)));

        assert!(h1.join().unwrap().is_ok());
        assert!(h2.join().unwrap().is_ok());
    });

    // a slot is free again now that both ACKs landed.
    assert!(session.try_send(Frame::new()).is_ok());
    controller.join().unwrap();
}

/// S3. A scheduled timestamp plus a previously calibrated delta lands on
/// the wire as their sum.
#[test]
fn s3_scheduled_timestamp_is_rewritten_by_calibrated_delta() {
    let (host_link, mut controller_link) = loopback_pair();
    let config = test_config();
    const DELTA: i64 = 1000;

    let controller = {
        let config = config.clone();
        thread::spawn(move || {
            controller_handshake(&mut controller_link, &config);
            // warm the estimator with frames whose controller time is
            // consistently host time + DELTA.
            for _ in 0..8 {
                let frame = recv_data_frame(&mut controller_link);
                let t = now_ms();
                send_ack(&mut controller_link, frame.sequence, AckStatus::Ok, (t as i64 + DELTA) as u64, (t as i64 + DELTA) as u64);
            }
            // the scheduled frame under test
            let frame = recv_data_frame(&mut controller_link);
            assert!((frame.timestamp as i64 - (5_000 + DELTA)).abs() <= 5);
            send_ack(&mut controller_link, frame.sequence, AckStatus::Ok, now_ms(), now_ms());
        })
    };

    let session = Session::connect(Box::new(host_link), Duration::from_secs(2)).unwrap();
    session.calibrate(8).unwrap();
    assert!((session.time_delta_ms() - DELTA).abs() <= 5);

    let mut frame = Frame::new();
    frame.timestamp = 5_000;
    session.send(frame).unwrap();

    controller.join().unwrap();
}

/// S4. After calibration the published delta tracks the controller's
/// advertised (jittery) offset closely.
#[test]
fn s4_calibration_converges_within_tolerance() {
    let (host_link, mut controller_link) = loopback_pair();
    let config = test_config();

    let controller = {
        let config = config.clone();
        thread::spawn(move || {
            controller_handshake(&mut controller_link, &config);
            let jitters: [i64; 4] = [-2, -1, 1, 2];
            for i in 0..100 {
                let frame = recv_data_frame(&mut controller_link);
                let jitter = jitters[i % jitters.len()];
                let t = now_ms() as i64 + 1000 + jitter;
                send_ack(&mut controller_link, frame.sequence, AckStatus::Ok, t as u64, t as u64);
            }
        })
    };

    let session = Session::connect(Box::new(host_link), Duration::from_secs(2)).unwrap();
    session.calibrate(100).unwrap();
    assert!((session.time_delta_ms() - 1000).abs() <= 2, "delta = {}", session.time_delta_ms());

    controller.join().unwrap();
}

/// `Session::ping` reports one timing sample per call.
#[test]
fn ping_reports_one_timing_sample_per_call() {
    let (host_link, mut controller_link) = loopback_pair();
    let config = test_config();

    let controller = {
        let config = config.clone();
        thread::spawn(move || {
            controller_handshake(&mut controller_link, &config);
            for _ in 0..3 {
                let frame = recv_data_frame(&mut controller_link);
                assert_eq!(frame.command, Command::Ping);
                send_ack(&mut controller_link, frame.sequence, AckStatus::Ok, now_ms(), now_ms());
            }
        })
    };

    let session = Session::connect(Box::new(host_link), Duration::from_secs(2)).unwrap();
    let reports = session.ping(3, Duration::from_millis(1)).unwrap();
    assert_eq!(reports.len(), 3);

    controller.join().unwrap();
}

/// P3/P4/S2. Four frames sent back-to-back (non-blocking) leave the
/// wire in call order, but their ACKs are deliberately returned out of
/// order; every frame still completes and is matched to the right
/// sequence.
#[test]
fn p3_p4_s2_out_of_order_acks_still_match_the_right_frame() {
    let (host_link, mut controller_link) = loopback_pair();
    let mut config = test_config();
    config.frame_buffer_size = 4;

    let controller = {
        let config = config.clone();
        thread::spawn(move || {
            controller_handshake(&mut controller_link, &config);
            let frames: Vec<_> = (0..4).map(|_| recv_data_frame(&mut controller_link)).collect();
            // P3: wire order matches send order.
            for window in frames.windows(2) {
                assert!(window[0].sequence < window[1].sequence);
            }
            // complete in the order 1, 3, 4, 2 (spec.md §8 S2).
            for &i in &[0usize, 2, 3, 1] {
                send_ack(&mut controller_link, frames[i].sequence, AckStatus::Ok, now_ms(), now_ms());
            }
        })
    };

    let session = Session::connect(Box::new(host_link), Duration::from_secs(2)).unwrap();

    thread::scope(|scope| {
        let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| session.send(Frame::new()))).collect();
        for h in handles {
            assert!(h.join().unwrap().is_ok());
        }
    });

    session.flush_buffer().unwrap();
    controller.join().unwrap();
}

/// `INVALID_ARGUMENT` is reported synchronously, without touching the
/// wire, when colors run past the strip.
#[test]
fn invalid_argument_is_reported_without_touching_the_wire() {
    let (host_link, mut controller_link) = loopback_pair();
    let config = test_config();

    let controller = {
        let config = config.clone();
        thread::spawn(move || controller_handshake(&mut controller_link, &config))
    };

    let session = Session::connect(Box::new(host_link), Duration::from_secs(2)).unwrap();
    let too_many: Vec<Color> = (0..(config.led_count + 1)).map(|_| Color::new(1, 1, 1)).collect();
    let err = session.set_colors(too_many).unwrap_err();
    assert!(matches!(err, alup_core::SessionError::InvalidArgument(_)));

    controller.join().unwrap();
}

/// The controller closing its end of the link (not just going silent)
/// is noticed by the reader thread as an orderly close, not mistaken
/// for a repeating timeout, and surfaces as `LINK_CLOSED` (spec.md §5,
/// §7).
#[test]
fn controller_closing_the_link_is_reported_as_link_closed_not_a_timeout() {
    let (host_link, mut controller_link) = loopback_pair();
    let config = test_config();

    let controller = {
        let config = config.clone();
        thread::spawn(move || {
            controller_handshake(&mut controller_link, &config);
            let frame = recv_data_frame(&mut controller_link);
            send_ack(&mut controller_link, frame.sequence, AckStatus::Ok, now_ms(), now_ms());
            controller_link.close().unwrap();
        })
    };

    let session = Session::connect(Box::new(host_link), Duration::from_secs(2)).unwrap();
    session.send(Frame::new()).unwrap();

    // give the reader thread a moment to notice the close.
    thread::sleep(Duration::from_millis(100));
    let err = session.send(Frame::new()).unwrap_err();
    assert!(matches!(err, alup_core::SessionError::LinkClosed));

    controller.join().unwrap();
}
