use crate::events::RecordDoneEvent;
use crate::hooks::{HookDecision, LifecycleHook};
use crate::relay::{hashed_stream_name, RelayRequest, SubscriberRequest};
use crate::test_utils;
use bytes::Bytes;
use std::time::Duration;
use test_context::*;


#[tokio::test]
async fn connect_success_proceeds_unchanged() {
    let mut context = TestContextBuilder::new().build();

    let decision = context.connect(live_connect());
    let exchange = context.expect_exchange("http://control/connect").await;
    assert_eq!(exchange.field("call"), Some("connect"), "Unexpected call");
    assert_eq!(exchange.field("app"), Some("live"), "Unexpected app");
    assert_eq!(exchange.field("epoch"), Some("100"), "Unexpected epoch");
    assert_eq!(exchange.field("addr"), Some("10.0.0.5"), "Unexpected addr");
    exchange.respond(OK_RESPONSE);

    match expect_decision(decision).await {
        HookDecision::Proceed(event) => assert_eq!(event, live_connect()),
        HookDecision::Deny => panic!("Expected connect to proceed"),
    }
}

#[tokio::test]
async fn connect_failure_denies() {
    let mut context = TestContextBuilder::new().build();

    let decision = context.connect(live_connect());
    context
        .expect_exchange("http://control/connect")
        .await
        .respond(DENIED_RESPONSE);

    assert_eq!(expect_decision(decision).await, HookDecision::Deny);
}

#[tokio::test]
async fn connect_transport_error_denies() {
    let mut context = TestContextBuilder::new().build();

    let decision = context.connect(live_connect());
    context.expect_exchange("http://control/connect").await.fail();

    assert_eq!(expect_decision(decision).await, HookDecision::Deny);
}

#[tokio::test]
async fn connect_redirect_rewrites_app() {
    let mut context = TestContextBuilder::new().build();

    let decision = context.connect(live_connect());
    context
        .expect_exchange("http://control/connect")
        .await
        .respond(&redirect_response("other"));

    match expect_decision(decision).await {
        HookDecision::Proceed(event) => assert_eq!(event.app, "other", "Unexpected app"),
        HookDecision::Deny => panic!("Expected connect to proceed"),
    }
}

#[tokio::test]
async fn connect_proceeds_without_notification_when_not_configured() {
    let config = "
application live {
    on_publish http://control/publish
}
";

    let mut context = TestContextBuilder::new().config(config).build();
    let decision = context.connect(live_connect());

    assert_eq!(
        expect_decision(decision).await,
        HookDecision::Proceed(live_connect())
    );

    context.expect_no_exchange().await;
}

#[tokio::test]
async fn publish_success_proceeds_with_original_name() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.publish("abc");
    let exchange = context.expect_exchange("http://control/publish").await;
    assert_eq!(exchange.field("call"), Some("publish"), "Unexpected call");
    assert_eq!(exchange.field("name"), Some("abc"), "Unexpected name");
    assert_eq!(exchange.field("type"), Some("live"), "Unexpected type");
    assert_eq!(exchange.field("clientid"), Some("7"), "Unexpected client id");
    exchange.respond(OK_RESPONSE);

    match expect_decision(decision).await {
        HookDecision::Proceed(event) => assert_eq!(event.stream_name, "abc"),
        HookDecision::Deny => panic!("Expected publish to proceed"),
    }
}

#[tokio::test]
async fn publish_failure_denies_and_clears_role() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.publish("abc");
    context
        .expect_exchange("http://control/publish")
        .await
        .respond(DENIED_RESPONSE);

    assert_eq!(expect_decision(decision).await, HookDecision::Deny);

    context.session.on_close_stream().await;
    context.expect_no_exchange().await;
}

#[tokio::test]
async fn publish_redirect_without_rtmp_scheme_renames_locally() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.publish("abc");
    context
        .expect_exchange("http://control/publish")
        .await
        .respond(&redirect_response("renamed"));

    match expect_decision(decision).await {
        HookDecision::Proceed(event) => assert_eq!(event.stream_name, "renamed"),
        HookDecision::Deny => panic!("Expected publish to proceed"),
    }

    test_utils::expect_mpsc_timeout(&mut context.relay).await;

    // Close time notifications use the new name
    context.session.on_close_stream().await;
    let exchange = context.expect_exchange("http://control/publish_done").await;
    assert_eq!(exchange.field("name"), Some("renamed"), "Unexpected name");
}

#[tokio::test]
async fn publish_redirect_to_rtmp_registers_push() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.publish("abc");
    context
        .expect_exchange("http://control/publish")
        .await
        .respond(&redirect_response("rtmp://origin:1940/ingest/xyz"));

    match expect_decision(decision).await {
        HookDecision::Proceed(event) => assert_eq!(event.stream_name, "abc"),
        HookDecision::Deny => panic!("Expected publish to proceed"),
    }

    let request = test_utils::expect_mpsc_response(&mut context.relay).await;
    match request {
        RelayRequest::Push {
            local_name, target, ..
        } => {
            assert_eq!(local_name, "abc", "Unexpected local name");
            assert_eq!(target.host, "origin", "Unexpected host");
            assert_eq!(target.port, 1940, "Unexpected port");
            assert_eq!(target.app, "ingest", "Unexpected app");
            assert_eq!(target.play_path, "xyz", "Unexpected play path");
        }

        x => panic!("Unexpected relay request: {:?}", x),
    }
}

#[tokio::test]
async fn publish_push_uses_hashed_name_when_relay_redirect_enabled() {
    let config = "
application live {
    on_publish http://control/publish
    relay_redirect on
}
";

    let mut context = TestContextBuilder::new().config(config).build();
    let connect = context.connect(live_connect());
    expect_decision(connect).await;

    let decision = context.publish("abc");
    context
        .expect_exchange("http://control/publish")
        .await
        .respond(&redirect_response("rtmp://origin/ingest/xyz"));

    let expected_name = hashed_stream_name("rtmp://origin/ingest/xyz");
    match expect_decision(decision).await {
        HookDecision::Proceed(event) => {
            assert_eq!(event.stream_name, expected_name, "Unexpected stream name")
        }

        HookDecision::Deny => panic!("Expected publish to proceed"),
    }

    match test_utils::expect_mpsc_response(&mut context.relay).await {
        RelayRequest::Push { local_name, .. } => {
            assert_eq!(local_name, expected_name, "Unexpected local name");
        }

        x => panic!("Unexpected relay request: {:?}", x),
    }
}

#[tokio::test]
async fn publish_redirect_to_invalid_rtmp_target_denied_but_role_kept() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.publish("abc");
    context
        .expect_exchange("http://control/publish")
        .await
        .respond(&redirect_response("rtmp://origin_only"));

    assert_eq!(expect_decision(decision).await, HookDecision::Deny);
    test_utils::expect_mpsc_timeout(&mut context.relay).await;

    context.session.on_close_stream().await;
    context.expect_exchange("http://control/publish_done").await;
    context.expect_exchange("http://control/done").await;
}

#[tokio::test]
async fn second_outstanding_publish_is_denied() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let first = context.publish("abc");
    let exchange = context.expect_exchange("http://control/publish").await;

    let second = context.publish("def");
    assert_eq!(expect_decision(second).await, HookDecision::Deny);

    exchange.respond(OK_RESPONSE);
    match expect_decision(first).await {
        HookDecision::Proceed(event) => assert_eq!(event.stream_name, "abc"),
        HookDecision::Deny => panic!("Expected first publish to proceed"),
    }
}

#[tokio::test]
async fn publisher_close_fires_publish_done_then_done() {
    let mut context = TestContextBuilder::new().build();
    context.start_publishing("abc").await;

    context.session.on_close_stream().await;

    let exchange = context.expect_exchange("http://control/publish_done").await;
    assert_eq!(exchange.field("call"), Some("publish_done"), "Unexpected call");
    assert_eq!(exchange.field("name"), Some("abc"), "Unexpected name");

    let exchange = context.expect_exchange("http://control/done").await;
    assert_eq!(exchange.field("call"), Some("done"), "Unexpected call");

    context.expect_no_exchange().await;
}

#[tokio::test]
async fn player_close_fires_play_done_then_done() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.play("abc");
    context
        .expect_exchange("http://control/play")
        .await
        .respond(OK_RESPONSE);

    expect_decision(decision).await;
    context.session.on_close_stream().await;

    context.expect_exchange("http://control/play_done").await;
    context.expect_exchange("http://control/done").await;
    context.expect_no_exchange().await;
}

#[tokio::test]
async fn close_without_stream_fires_nothing() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    context.session.on_close_stream().await;
    context.expect_no_exchange().await;
}

#[tokio::test]
async fn close_notifications_owed_even_when_play_is_denied_by_exhaustion() {
    let config = "
application live {
    on_play http://control/play
    on_play_done http://control/play_done
    on_done http://control/done
    reconnect_time_gap 3s
    reconnect_timeout 3s
}
";

    let mut context = TestContextBuilder::new().config(config).build();
    let connect = context.connect(live_connect());
    expect_decision(connect).await;

    let decision = context.play("abc");
    context
        .expect_exchange("http://control/play")
        .await
        .respond(&address_list_response(&["http://not-rtmp/app/s"]));

    assert_eq!(expect_decision(decision).await, HookDecision::Deny);

    context.session.on_close_stream().await;
    context.expect_exchange("http://control/play_done").await;
    context.expect_exchange("http://control/done").await;
}

#[tokio::test]
async fn play_request_includes_play_fields() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let _decision = context.play("abc");
    let exchange = context.expect_exchange("http://control/play").await;
    assert_eq!(exchange.field("call"), Some("play"), "Unexpected call");
    assert_eq!(exchange.field("name"), Some("abc"), "Unexpected name");
    assert_eq!(exchange.field("start"), Some("4294967294"), "Unexpected start");
    assert_eq!(exchange.field("duration"), Some("4294967295"), "Unexpected duration");
    assert_eq!(exchange.field("reset"), Some("0"), "Unexpected reset");
}

#[tokio::test]
async fn play_without_addresses_proceeds_locally() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.play("abc");
    context
        .expect_exchange("http://control/play")
        .await
        .respond(&json_response("{\"state\":0}"));

    match expect_decision(decision).await {
        HookDecision::Proceed(event) => assert_eq!(event.stream_name, "abc"),
        HookDecision::Deny => panic!("Expected play to proceed"),
    }

    test_utils::expect_mpsc_timeout(&mut context.relay).await;
    test_utils::expect_mpsc_timeout(&mut context.subscribers).await;
}

#[tokio::test]
async fn play_failure_denies_and_clears_role() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.play("abc");
    context
        .expect_exchange("http://control/play")
        .await
        .respond(DENIED_RESPONSE);

    assert_eq!(expect_decision(decision).await, HookDecision::Deny);

    context.session.on_close_stream().await;
    context.expect_no_exchange().await;
}

#[tokio::test]
async fn play_address_list_rebinds_then_pulls_first_rtmp_candidate() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.play("abc");
    context
        .expect_exchange("http://control/play")
        .await
        .respond(&address_list_response(&[
            "http://x/y/z",
            "rtmp://origin1/app1/stream1",
        ]));

    match expect_decision(decision).await {
        HookDecision::Proceed(event) => assert_eq!(event.stream_name, "abc"),
        HookDecision::Deny => panic!("Expected play to proceed"),
    }

    match test_utils::expect_mpsc_response(&mut context.subscribers).await {
        SubscriberRequest::Rebind { session_id } => {
            assert_eq!(session_id.0, "session", "Unexpected session id");
        }
    }

    match test_utils::expect_mpsc_response(&mut context.relay).await {
        RelayRequest::Pull {
            local_name, target, ..
        } => {
            assert_eq!(local_name, "abc", "Unexpected local name");
            assert_eq!(target.host, "origin1", "Unexpected host");
            assert_eq!(target.app, "app1", "Unexpected app");
            assert_eq!(target.play_path, "stream1", "Unexpected play path");
        }

        x => panic!("Unexpected relay request: {:?}", x),
    }
}

#[tokio::test]
async fn fragmented_address_list_response_still_fails_over() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.play("abc");
    let body = "{\"state\":0,\"content\":{\"addrs\":[{\"addr\":\"rtmp://origin1/app1/s1\"}]}}";
    let raw = json_response(body);
    let header_end = raw.find("\r\n\r\n").unwrap() + 1;

    // Split inside the status line and between the blank line's CR and LF
    context
        .expect_exchange("http://control/play")
        .await
        .respond_chunks(vec![
            Bytes::copy_from_slice(raw[..6].as_bytes()),
            Bytes::copy_from_slice(raw[6..header_end].as_bytes()),
            Bytes::copy_from_slice(raw[header_end..].as_bytes()),
        ]);

    match expect_decision(decision).await {
        HookDecision::Proceed(event) => assert_eq!(event.stream_name, "abc"),
        HookDecision::Deny => panic!("Expected play to proceed"),
    }

    test_utils::expect_mpsc_response(&mut context.subscribers).await;
    match test_utils::expect_mpsc_response(&mut context.relay).await {
        RelayRequest::Pull { target, .. } => {
            assert_eq!(target.url, "rtmp://origin1/app1/s1", "Unexpected url");
        }

        x => panic!("Unexpected relay request: {:?}", x),
    }
}

#[tokio::test]
async fn fragmented_redirect_renames_publish() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.publish("abc");
    context
        .expect_exchange("http://control/publish")
        .await
        .respond_chunks(vec![
            Bytes::from_static(b"HTTP/1.1 3"),
            Bytes::from_static(b"02 Found\r\nLoca"),
            Bytes::from_static(b"tion: renamed\r"),
            Bytes::from_static(b"\nContent-Length: 0\r\n\r\n"),
        ]);

    match expect_decision(decision).await {
        HookDecision::Proceed(event) => assert_eq!(event.stream_name, "renamed"),
        HookDecision::Deny => panic!("Expected publish to proceed"),
    }
}

#[tokio::test]
async fn play_redirect_is_single_candidate() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.play("abc");
    context
        .expect_exchange("http://control/play")
        .await
        .respond(&redirect_response("rtmp://origin2/app2"));

    expect_decision(decision).await;
    test_utils::expect_mpsc_response(&mut context.subscribers).await;

    match test_utils::expect_mpsc_response(&mut context.relay).await {
        RelayRequest::Pull { target, .. } => {
            assert_eq!(target.host, "origin2", "Unexpected host");
            assert_eq!(target.play_path, "abc", "Expected requested name as play path");
            assert_eq!(target.url, "rtmp://origin2/app2/abc", "Unexpected url");
        }

        x => panic!("Unexpected relay request: {:?}", x),
    }
}

#[tokio::test(start_paused = true)]
async fn failover_retries_at_reconnect_gap_then_denies() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.play("abc");
    context
        .expect_exchange("http://control/play")
        .await
        .respond(&address_list_response(&["http://a/b/c", "http://d/e/f"]));

    // 12s timeout with a 3s gap gives 4 passes, at 0s, 3s, 6s and 9s
    tokio::time::sleep(Duration::from_millis(8_900)).await;
    assert!(!decision.is_finished(), "Play decided before the final pass");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(expect_decision(decision).await, HookDecision::Deny);

    test_utils::expect_mpsc_timeout(&mut context.relay).await;
}

#[tokio::test]
async fn upstream_failure_moves_to_next_candidate() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let decision = context.play("abc");
    context
        .expect_exchange("http://control/play")
        .await
        .respond(&address_list_response(&[
            "rtmp://origin1/app/s",
            "rtmp://origin2/app/s",
        ]));

    expect_decision(decision).await;
    test_utils::expect_mpsc_response(&mut context.subscribers).await;
    test_utils::expect_mpsc_response(&mut context.relay).await;

    context.session.report_upstream_failure();

    test_utils::expect_mpsc_response(&mut context.subscribers).await;
    match test_utils::expect_mpsc_response(&mut context.relay).await {
        RelayRequest::Pull { target, .. } => {
            assert_eq!(target.host, "origin2", "Unexpected host");
        }

        x => panic!("Unexpected relay request: {:?}", x),
    }
}

#[tokio::test(start_paused = true)]
async fn tolerated_update_schedules_exactly_one_more() {
    let mut context = TestContextBuilder::new().build();
    context.start_publishing("abc").await;
    let _ = context.media_timestamp.send(5000);

    tokio::time::sleep(Duration::from_secs(25)).await;
    context.expect_no_exchange().await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    let exchange = context.expect_exchange("http://control/update").await;
    assert_eq!(exchange.field("call"), Some("update_publish"), "Unexpected call");
    assert_eq!(exchange.field("time"), Some("30"), "Unexpected time");
    assert_eq!(exchange.field("timestamp"), Some("5000"), "Unexpected timestamp");
    assert_eq!(exchange.field("name"), Some("abc"), "Unexpected name");
    exchange.respond(OK_RESPONSE);

    tokio::time::sleep(Duration::from_secs(25)).await;
    context.expect_no_exchange().await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    context.expect_exchange("http://control/update").await;
    context.expect_no_exchange().await;
}

#[tokio::test(start_paused = true)]
async fn intolerable_update_stops_heartbeat() {
    let mut context = TestContextBuilder::new().build();
    context.start_publishing("abc").await;

    tokio::time::sleep(Duration::from_secs(31)).await;
    context
        .expect_exchange("http://control/update")
        .await
        .respond(DENIED_RESPONSE);

    tokio::time::sleep(Duration::from_secs(120)).await;
    context.expect_no_exchange().await;
}

#[tokio::test(start_paused = true)]
async fn strict_update_stops_on_redirect() {
    let config = "
notify {
    on_connect http://control/connect
}

application live {
    on_publish http://control/publish
    on_update http://control/update
    update_timeout 30s
    update_strict on
}
";

    let mut context = TestContextBuilder::new().config(config).build();
    context.start_publishing("abc").await;

    tokio::time::sleep(Duration::from_secs(31)).await;
    context
        .expect_exchange("http://control/update")
        .await
        .respond(&redirect_response("somewhere"));

    tokio::time::sleep(Duration::from_secs(120)).await;
    context.expect_no_exchange().await;
}

#[tokio::test(start_paused = true)]
async fn close_cancels_heartbeat() {
    let mut context = TestContextBuilder::new().build();
    context.start_publishing("abc").await;

    context.session.on_close_stream().await;
    context.expect_exchange("http://control/publish_done").await;
    context.expect_exchange("http://control/done").await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    context.expect_no_exchange().await;
}

#[tokio::test]
async fn disconnect_fires_disconnect_then_owed_closes() {
    let mut context = TestContextBuilder::new().build();
    context.start_publishing("abc").await;

    context.session.on_disconnect().await;

    let exchange = context.expect_exchange("http://control/disconnect").await;
    assert_eq!(exchange.field("call"), Some("disconnect"), "Unexpected call");
    context.expect_exchange("http://control/publish_done").await;
    context.expect_exchange("http://control/done").await;
}

#[tokio::test]
async fn dropping_all_handles_fires_owed_closes() {
    let mut context = TestContextBuilder::new().build();
    context.start_publishing("abc").await;

    let TestContext {
        session,
        mut exchanges,
        ..
    } = context;

    drop(session);

    let exchange = test_utils::expect_mpsc_response(&mut exchanges).await;
    assert_eq!(exchange.request.url, "http://control/publish_done");

    let exchange = test_utils::expect_mpsc_response(&mut exchanges).await;
    assert_eq!(exchange.request.url, "http://control/done");
}

#[tokio::test]
async fn record_done_is_reported_independent_of_roles() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let event = RecordDoneEvent {
        recorder: "rec1".to_string(),
        path: "/tmp/abc.flv".to_string(),
    };

    context.session.on_record_done(event).await;
    let exchange = context.expect_exchange("http://control/record_done").await;
    assert_eq!(exchange.field("recorder"), Some("rec1"), "Unexpected recorder");
    assert_eq!(exchange.field("path"), Some("/tmp/abc.flv"), "Unexpected path");

    context.session.on_close_stream().await;
    context.expect_no_exchange().await;
}

#[tokio::test]
async fn relay_sessions_are_never_reported() {
    let mut context = TestContextBuilder::new().relay_session().build();

    let decision = context.connect(live_connect());
    assert_eq!(
        expect_decision(decision).await,
        HookDecision::Proceed(live_connect())
    );

    let decision = context.publish("abc");
    match expect_decision(decision).await {
        HookDecision::Proceed(event) => assert_eq!(event.stream_name, "abc"),
        HookDecision::Deny => panic!("Expected publish to proceed"),
    }

    context.session.on_close_stream().await;
    context.session.on_disconnect().await;
    context.expect_no_exchange().await;
}

#[tokio::test]
async fn silent_play_is_not_reported() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    let event = crate::events::PlayEvent {
        stream_name: "abc".to_string(),
        silent: true,
        ..Default::default()
    };

    let decision = context.session.on_play(event.clone()).await;
    assert_eq!(decision, HookDecision::Proceed(event));

    context.session.on_close_stream().await;
    context.expect_no_exchange().await;
}

#[tokio::test]
async fn inactive_application_is_not_reported() {
    let mut context = TestContextBuilder::new().build();

    let mut connect = live_connect();
    connect.app = "vod".to_string();

    let decision = context.connect(connect);
    context
        .expect_exchange("http://control/connect")
        .await
        .respond(OK_RESPONSE);

    expect_decision(decision).await;

    let decision = context.publish("abc");
    match expect_decision(decision).await {
        HookDecision::Proceed(event) => assert_eq!(event.stream_name, "abc"),
        HookDecision::Deny => panic!("Expected publish to proceed"),
    }

    context.session.on_close_stream().await;
    context.expect_no_exchange().await;
}

#[tokio::test]
async fn requests_after_disconnect_are_denied() {
    let mut context = TestContextBuilder::new().build();
    context.connect_to_live().await;

    context.session.on_disconnect().await;
    context.expect_exchange("http://control/disconnect").await;

    let decision = context.publish("abc");
    assert_eq!(expect_decision(decision).await, HookDecision::Deny);
}
