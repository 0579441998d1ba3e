mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use mailrelay::{
    Envelope, IntakeOptions, IntakeServer, MailAddress, MessageHandler, ReferenceServer, Relay,
    RelayError, RelayOutcome, SenderGate, SenderRules, ServerOptions, Stage, relay,
};

use common::{WAIT, options_for, relay_to, start, test_envelope};

#[test]
fn relays_envelope_over_starttls() {
    let server = start(ServerOptions::default().with_starttls());
    relay_to(&server).send(&test_envelope()).expect("relay succeeds");

    let transcript = server.last_transcript().expect("transcript recorded");
    assert_eq!(transcript.from, "sender@test.com");
    assert_eq!(
        transcript.to,
        ["recipient1@example.com", "recipient2@example.com"]
    );
    assert!(transcript.data.contains("This is a test email body."));
    assert!(transcript.used_tls);
    let starttls = transcript.command_index("STARTTLS").expect("STARTTLS sent");
    let mail = transcript.command_index("MAIL").expect("MAIL sent");
    assert!(starttls < mail);
    assert!(transcript.has_command("QUIT"));
}

#[test]
fn relays_envelope_over_implicit_tls() {
    let server = start(ServerOptions::default().with_implicit_tls());
    relay_to(&server).send(&test_envelope()).expect("relay succeeds");

    let transcript = server.last_transcript().expect("transcript recorded");
    assert!(transcript.used_tls);
    assert!(!transcript.has_command("STARTTLS"));
    assert_eq!(transcript.to.len(), 2);
}

#[test]
fn plain_auth_after_starttls() {
    let server = start(ServerOptions::default().with_starttls().with_auth(false));
    let mut options = options_for(&server);
    options.username = "testuser".to_string();
    options.password = "testpass".to_string();
    Relay::new(options, Arc::new(SenderGate::allow_all()))
        .send(&test_envelope())
        .expect("relay succeeds");

    let transcript = server.last_transcript().expect("transcript recorded");
    assert_eq!(transcript.auth_user, "testuser");
    assert_eq!(transcript.auth_pass, "testpass");
    let starttls = transcript.command_index("STARTTLS").expect("STARTTLS sent");
    let auth = transcript.command_index("AUTH").expect("AUTH sent");
    let mail = transcript.command_index("MAIL").expect("MAIL sent");
    assert!(starttls < auth && auth < mail);
}

#[test]
fn login_auth_answers_both_prompts() {
    let server = start(ServerOptions::default().with_starttls().with_auth(true));
    let mut options = options_for(&server);
    options.login_auth = true;
    options.username = "testuser".to_string();
    options.password = "testpass".to_string();
    Relay::new(options, Arc::new(SenderGate::allow_all()))
        .send(&test_envelope())
        .expect("relay succeeds");

    let transcript = server.last_transcript().expect("transcript recorded");
    assert!(transcript.commands.iter().any(|line| line == "AUTH LOGIN"));
    assert_eq!(transcript.auth_user, "testuser");
    assert_eq!(transcript.auth_pass, "testpass");
}

#[test]
fn unknown_login_prompt_aborts_before_mail() {
    let server = start(
        ServerOptions::default()
            .with_starttls()
            .with_auth(true)
            .with_login_prompts("Token:", "Password:"),
    );
    let mut options = options_for(&server);
    options.login_auth = true;
    options.username = "testuser".to_string();
    options.password = "testpass".to_string();

    let err = Relay::new(options, Arc::new(SenderGate::allow_all()))
        .send(&test_envelope())
        .expect_err("unknown prompt");
    assert!(err.is_unknown_auth_prompt());
    assert_eq!(err.stage(), Some(Stage::Auth));
    assert!(err.to_string().contains("Token:"));

    let transcripts = server.wait_for_transcripts(1, WAIT);
    assert_eq!(transcripts.len(), 1);
    assert!(!transcripts[0].has_command("MAIL"));
}

#[test]
fn blocked_sender_never_reaches_server() {
    let server = start(ServerOptions::default().with_starttls());
    let gate = Arc::new(SenderGate::new(SenderRules::allow_list(["127.0.0.1"], true)));
    let relay = Relay::new(options_for(&server), gate);
    let mut envelope = test_envelope();
    envelope.remote_ip = "192.168.1.100".to_string();

    let err = relay.send(&envelope).expect_err("blocked");
    assert!(matches!(err, RelayError::AdmissionDenied { .. }));
    assert_eq!(
        err.to_string(),
        "Remote IP of 192.168.1.100 not allowed to send email."
    );
    assert!(
        server
            .wait_for_transcripts(1, Duration::from_millis(300))
            .is_empty()
    );
}

#[test]
fn sender_inside_allowed_range_is_relayed() {
    let server = start(ServerOptions::default().with_starttls());
    let gate = Arc::new(SenderGate::new(SenderRules::allow_list(
        ["192.168.1.0/24"],
        true,
    )));
    let mut envelope = test_envelope();
    envelope.remote_ip = "192.168.1.100".to_string();
    Relay::new(options_for(&server), gate)
        .send(&envelope)
        .expect("allowed by CIDR");
    assert!(server.last_transcript().is_some());
}

fn failing_stage(verb: &str) -> (RelayError, ReferenceServer) {
    let server = start(ServerOptions::default().with_starttls().failing(verb));
    let err = relay_to(&server)
        .send(&test_envelope())
        .expect_err("forced failure");
    (err, server)
}

#[test]
fn rejected_mail_from_is_a_mail_error() {
    let (err, _server) = failing_stage("MAIL");
    assert_eq!(err.stage(), Some(Stage::Mail));
    assert_eq!(err.to_string(), "mail error: 550 Command failed");
}

#[test]
fn rejected_recipient_stops_before_data() {
    let (err, server) = failing_stage("RCPT");
    assert_eq!(err.stage(), Some(Stage::Rcpt));
    assert!(err.to_string().starts_with("rcpt error"));

    let transcripts = server.wait_for_transcripts(1, WAIT);
    assert_eq!(transcripts.len(), 1);
    assert!(transcripts[0].has_command("RCPT"));
    assert!(!transcripts[0].has_command("DATA"));
}

#[test]
fn rejected_data_is_a_data_error() {
    let (err, _server) = failing_stage("DATA");
    assert_eq!(err.stage(), Some(Stage::Data));
    assert!(err.to_string().starts_with("data error"));
}

#[test]
fn rejected_auth_is_an_auth_error() {
    let server = start(
        ServerOptions::default()
            .with_starttls()
            .with_auth(false)
            .failing("AUTH"),
    );
    let mut options = options_for(&server);
    options.username = "testuser".to_string();
    options.password = "testpass".to_string();
    let err = Relay::new(options, Arc::new(SenderGate::allow_all()))
        .send(&test_envelope())
        .expect_err("auth refused");
    assert_eq!(err.stage(), Some(Stage::Auth));
    assert!(!err.is_unknown_auth_prompt());

    // the refused exchange is cancelled before the session is dropped
    let transcripts = server.wait_for_transcripts(1, WAIT);
    assert_eq!(transcripts.len(), 1);
    let auth = transcripts[0].command_index("AUTH").expect("AUTH sent");
    assert_eq!(transcripts[0].commands.get(auth + 1).map(String::as_str), Some("*"));
    assert!(!transcripts[0].has_command("MAIL"));
}

#[test]
fn quit_answered_with_250_counts_as_sent() {
    let server = start(
        ServerOptions::default()
            .with_starttls()
            .responding("QUIT", "250 OK"),
    );
    assert_eq!(relay_to(&server).relay(&test_envelope()), RelayOutcome::Sent);
}

#[test]
fn quit_failures_are_reported() {
    for reply in ["421 Service not available", "550 Mailbox not found"] {
        let server = start(ServerOptions::default().with_starttls().responding("QUIT", reply));
        let err = relay_to(&server)
            .send(&test_envelope())
            .expect_err("quit failure");
        assert_eq!(err.stage(), Some(Stage::Quit), "{reply}");
        assert!(err.to_string().contains(reply), "{err}");
    }
}

#[test]
fn slow_server_within_timeout_succeeds() {
    let delay = Duration::from_millis(200);
    let server = start(ServerOptions::default().with_starttls().with_delay(delay));
    let started = Instant::now();
    relay_to(&server).send(&test_envelope()).expect("relay succeeds");
    assert!(started.elapsed() >= delay);
}

#[test]
fn self_signed_certificate_is_refused_when_verifying() {
    let server = start(ServerOptions::default().with_implicit_tls());
    let mut options = options_for(&server);
    options.skip_cert_verify = false;
    let err = Relay::new(options, Arc::new(SenderGate::allow_all()))
        .send(&test_envelope())
        .expect_err("untrusted certificate");
    assert!(matches!(err, RelayError::ConnectionFailed { .. }));
    assert!(err.to_string().to_lowercase().contains("certificate"), "{err}");
}

#[test]
fn intake_hands_messages_to_the_relay() {
    let upstream = start(ServerOptions::default().with_starttls());
    let handler: Arc<dyn MessageHandler> = Arc::new(relay_to(&upstream));
    let intake = IntakeServer::bind(
        "127.0.0.1:0".parse().expect("addr"),
        IntakeOptions::default(),
        handler,
    )
    .expect("bind intake");
    let port = intake.local_addr().expect("addr").port();
    std::thread::spawn(move || intake.serve());

    let envelope = Envelope::new(MailAddress::new("client", "office.test"), "")
        .with_recipient(MailAddress::new("someone", "example.com"))
        .with_body("Subject: via intake\n\nhello\n");
    relay::submit("127.0.0.1", port, &envelope, Some(WAIT)).expect("queued");

    let transcript = upstream.last_transcript().expect("relayed upstream");
    assert_eq!(transcript.from, "client@office.test");
    assert_eq!(transcript.to, ["someone@example.com"]);
    assert!(transcript.data.contains("hello"));
}

#[test]
fn greeting_timeout_is_a_handshake_error() {
    let delay = Duration::from_secs(2);
    let server = start(ServerOptions::default().with_starttls().with_delay(delay));
    let mut options = options_for(&server);
    options.timeout = Some(Duration::from_millis(300));
    let started = Instant::now();
    let err = Relay::new(options, Arc::new(SenderGate::allow_all()))
        .send(&test_envelope())
        .expect_err("greeting never arrives in time");
    assert!(started.elapsed() < delay, "{:?}", started.elapsed());
    assert!(matches!(err, RelayError::ProtocolFailed { .. }));
    assert_eq!(err.stage(), Some(Stage::Handshake));
}

#[test]
fn refused_ehlo_falls_back_to_helo() {
    let server = start(ServerOptions::default().with_starttls().failing("EHLO"));
    relay_to(&server).send(&test_envelope()).expect("relay succeeds");

    let transcript = server.last_transcript().expect("transcript recorded");
    let ehlo = transcript.command_index("EHLO").expect("EHLO tried");
    let helo = transcript.command_index("HELO").expect("HELO fallback");
    assert!(ehlo < helo);
    assert!(transcript.used_tls);
    assert_eq!(transcript.to.len(), 2);
}

#[test]
fn refused_greeting_is_a_handshake_error() {
    let server = start(
        ServerOptions::default()
            .with_starttls()
            .failing("EHLO")
            .failing("HELO"),
    );
    let err = relay_to(&server)
        .send(&test_envelope())
        .expect_err("both greetings refused");
    assert_eq!(err.stage(), Some(Stage::Handshake));
    assert_eq!(err.to_string(), "handshake error: 550 Command failed");
}

#[test]
fn untrusted_certificate_after_starttls_is_an_upgrade_error() {
    let server = start(ServerOptions::default().with_starttls());
    let mut options = options_for(&server);
    options.skip_cert_verify = false;
    let err = Relay::new(options, Arc::new(SenderGate::allow_all()))
        .send(&test_envelope())
        .expect_err("untrusted certificate");
    assert!(matches!(err, RelayError::ProtocolFailed { .. }));
    assert_eq!(err.stage(), Some(Stage::Upgrade));
    assert!(err.to_string().starts_with("upgrade error"), "{err}");
    assert!(err.to_string().to_lowercase().contains("certificate"), "{err}");
}
