#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mailrelay::{
    Envelope, MailAddress, ReferenceServer, Relay, RelayOptions, SenderGate, ServerOptions,
};
use native_tls::Identity;

pub const WAIT: Duration = Duration::from_secs(5);

/// Self-signed identity for `localhost` and `127.0.0.1`.
pub fn identity() -> Identity {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .expect("generate certificate");
    Identity::from_pkcs8(cert.pem().as_bytes(), key_pair.serialize_pem().as_bytes())
        .expect("load identity")
}

pub fn start(options: ServerOptions) -> ReferenceServer {
    ReferenceServer::start(options, identity()).expect("start reference server")
}

/// Options reaching `server`: STARTTLS unless the server speaks implicit TLS,
/// certificate checks off for the self-signed identity.
pub fn options_for(server: &ReferenceServer) -> RelayOptions {
    let mut options = RelayOptions::new(server.host(), server.port());
    options.starttls = !server.options().implicit_tls;
    options.skip_cert_verify = true;
    options.timeout = Some(WAIT);
    options
}

pub fn relay_to(server: &ReferenceServer) -> Relay {
    Relay::new(options_for(server), Arc::new(SenderGate::allow_all()))
}

pub fn test_envelope() -> Envelope {
    Envelope::new(MailAddress::new("sender", "test.com"), "127.0.0.1")
        .with_recipient(MailAddress::new("recipient1", "example.com"))
        .with_recipient(MailAddress::new("recipient2", "example.com"))
        .with_body(
            "Subject: Test Email\r\n\r\nThis is a test email body.\r\n".as_bytes().to_vec(),
        )
}
