use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use room_bus::RoomChannel;

use crate::connection::uri::{DecodedConnection, UriCodec, UriError};
use crate::connection::validate::{self, MessageError};
use crate::connection::{LocalProfile, MetaConnection};
use crate::contacts::ContactStore;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Uri(#[from] UriError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("failed to deliver profile to '{peer}': {reason}")]
    SendFailure { peer: String, reason: String },
    #[error("no stored connection under '{0}'")]
    UnknownContact(String),
}

/// Which half of the exchange surface is active. Exactly one at a time:
/// flipped by explicit user action, or back to `Display` by completing a
/// scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    Display,
    Scan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Own profile was pushed to the peer and the discovered connection
    /// opened; scan mode is off.
    Completed(MetaConnection),
    /// Scan mode was no longer active when the frame arrived; dropped.
    Ignored,
}

/// Presentation-layer seam. Opening a connection is a pure hand-off with no
/// failure mode; notifications carry an error flag.
pub trait Presenter: Send + Sync {
    fn show_meta_connection(&self, connection: &MetaConnection);
    fn show_notification(&self, message: &str, is_error: bool);
}

/// Orchestrates the two exchange paths. Single logical actor: every entry
/// point takes `&mut self` and nothing here blocks; sends, notifications
/// and hand-offs are fire-and-forget from the controller's view.
pub struct ExchangeController {
    codec: UriCodec,
    profile: LocalProfile,
    room: Arc<dyn RoomChannel>,
    presenter: Arc<dyn Presenter>,
    contacts: Arc<dyn ContactStore>,
    mode: ExchangeMode,
    listener_registered: bool,
    was_connected: bool,
}

impl ExchangeController {
    pub fn new(
        codec: UriCodec,
        profile: LocalProfile,
        room: Arc<dyn RoomChannel>,
        presenter: Arc<dyn Presenter>,
        contacts: Arc<dyn ContactStore>,
    ) -> Self {
        Self {
            codec,
            profile,
            room,
            presenter,
            contacts,
            mode: ExchangeMode::Display,
            listener_registered: false,
            was_connected: false,
        }
    }

    pub fn mode(&self) -> ExchangeMode {
        self.mode
    }

    pub fn profile(&self) -> &LocalProfile {
        &self.profile
    }

    /// Explicit user action flipping between showing the own QR code and
    /// seeking a peer's.
    pub fn toggle_mode(&mut self) {
        self.mode = match self.mode {
            ExchangeMode::Display => ExchangeMode::Scan,
            ExchangeMode::Scan => ExchangeMode::Display,
        };
        debug!(mode = ?self.mode, "exchange mode toggled");
    }

    /// Feed connection-state updates from the room transport. The message
    /// listener is registered on the false-to-true edge and only there;
    /// repeated updates that do not represent that edge are no-ops, so a
    /// chatty transport cannot cause duplicate processing. Returns whether
    /// registration happened on this call.
    pub fn handle_connection_update(&mut self, connected: bool) -> bool {
        let rising_edge = connected && !self.was_connected;
        self.was_connected = connected;
        if !connected {
            // A dropped room invalidates the listener; the next established
            // transition registers a fresh one.
            self.listener_registered = false;
            return false;
        }
        if rising_edge && !self.listener_registered {
            self.listener_registered = true;
            info!("room connected, message listener registered");
            return true;
        }
        false
    }

    /// Path B: an inbound room message. Empty payloads are dropped without
    /// comment, malformed ones surface to the caller (who decides how to
    /// report), and a parsed profile is opened without replying; the
    /// inbound path is passive.
    pub fn handle_room_message(
        &mut self,
        raw: &str,
    ) -> Result<Option<MetaConnection>, ExchangeError> {
        if !self.listener_registered {
            debug!("room message arrived before listener registration, dropping");
            return Ok(None);
        }
        let payload = match validate::parse_room_message(raw)? {
            Some(payload) => payload,
            None => return Ok(None),
        };
        let connection = MetaConnection::from_payload(&payload);
        info!(peer = %connection.name, "profile received over the room");
        self.open(&connection);
        Ok(Some(connection))
    }

    /// Path A: a decoded frame from the optical scanner. Frames arriving
    /// after scan mode was toggled off are ignored. A frame that fails the
    /// gate or the decode notifies the user and leaves scan mode active so
    /// the next frame can retry. On success the own profile goes out to the
    /// discovered peer (fire-and-forget: a failed send notifies but does
    /// not stop the open), the discovered connection is opened, and scan
    /// mode ends.
    pub fn handle_scan(&mut self, raw: &str) -> Result<ScanOutcome, ExchangeError> {
        if self.mode != ExchangeMode::Scan {
            debug!("scan result arrived after scan mode ended, ignoring");
            return Ok(ScanOutcome::Ignored);
        }

        let DecodedConnection { peer, connection } = match UriCodec::decode(raw) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(error = %err, "rejected scanned frame");
                self.presenter.show_notification("Something went wrong!", true);
                return Err(err.into());
            }
        };

        if let Err(err) = self.send_profile(&peer) {
            warn!(peer = %peer, error = %err, "profile send failed");
            self.presenter
                .show_notification("Could not send your profile", true);
        }
        info!(peer = %peer, name = %connection.name, "scan exchange complete");
        self.open(&connection);
        self.mode = ExchangeMode::Display;
        Ok(ScanOutcome::Completed(connection))
    }

    /// Bootstrap URI for the local identity, or `None` while the room has
    /// not yet produced a usable identifier; the caller renders that as a
    /// loading state rather than an empty code.
    pub fn bootstrap_uri(&self) -> Option<Url> {
        if !self.room.is_connected() {
            return None;
        }
        let user_id = self.room.user_id()?;
        if user_id.is_empty() {
            return None;
        }
        Some(self.codec.encode(&user_id, &self.profile))
    }

    /// Reopen a connection the user already stored. The record comes back
    /// resolved (`request = false`).
    pub fn open_stored(&self, key: &str) -> Result<MetaConnection, ExchangeError> {
        let entry = self
            .contacts
            .lookup(key)
            .ok_or_else(|| ExchangeError::UnknownContact(key.to_string()))?;
        let connection = MetaConnection::from_stored(&entry);
        self.open(&connection);
        Ok(connection)
    }

    /// Stored-connection count, display only.
    pub fn contact_count(&self) -> usize {
        self.contacts.count()
    }

    /// Terminal step shared by both paths: hand the record to the
    /// presentation layer.
    fn open(&self, connection: &MetaConnection) {
        self.presenter.show_meta_connection(connection);
    }

    fn send_profile(&self, peer: &str) -> Result<(), ExchangeError> {
        let outbound = self.profile.to_connection();
        let payload = serde_json::to_vec(&outbound).map_err(|err| ExchangeError::SendFailure {
            peer: peer.to_string(),
            reason: err.to_string(),
        })?;
        self.room
            .send(peer, Bytes::from(payload))
            .map_err(|err| ExchangeError::SendFailure {
                peer: peer.to_string(),
                reason: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::{InMemoryContacts, StoredEntry};
    use parking_lot::Mutex;
    use room_bus::{RoomError, RoomMessage, RoomResult};
    use std::collections::BTreeMap;
    use tokio::sync::broadcast;

    struct MockRoom {
        user_id: Option<String>,
        connected: bool,
        fail_sends: bool,
        sent: Mutex<Vec<(String, Bytes)>>,
        events: broadcast::Sender<RoomMessage>,
    }

    impl MockRoom {
        fn connected() -> Self {
            Self {
                user_id: Some("local-id".into()),
                connected: true,
                fail_sends: false,
                sent: Mutex::new(Vec::new()),
                events: broadcast::channel(8).0,
            }
        }

        fn disconnected() -> Self {
            Self {
                user_id: None,
                connected: false,
                ..Self::connected()
            }
        }

        fn failing() -> Self {
            Self {
                fail_sends: true,
                ..Self::connected()
            }
        }

        fn sent(&self) -> Vec<(String, Bytes)> {
            self.sent.lock().clone()
        }
    }

    impl RoomChannel for MockRoom {
        fn user_id(&self) -> Option<String> {
            self.user_id.clone()
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn send(&self, peer: &str, payload: Bytes) -> RoomResult<()> {
            if self.fail_sends {
                return Err(RoomError::Closed);
            }
            self.sent.lock().push((peer.to_string(), payload));
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<RoomMessage> {
            self.events.subscribe()
        }
    }

    #[derive(Default)]
    struct RecordingPresenter {
        shown: Mutex<Vec<MetaConnection>>,
        notices: Mutex<Vec<(String, bool)>>,
    }

    impl RecordingPresenter {
        fn shown(&self) -> Vec<MetaConnection> {
            self.shown.lock().clone()
        }

        fn notices(&self) -> Vec<(String, bool)> {
            self.notices.lock().clone()
        }
    }

    impl Presenter for RecordingPresenter {
        fn show_meta_connection(&self, connection: &MetaConnection) {
            self.shown.lock().push(connection.clone());
        }

        fn show_notification(&self, message: &str, is_error: bool) {
            self.notices.lock().push((message.to_string(), is_error));
        }
    }

    struct Fixture {
        room: Arc<MockRoom>,
        presenter: Arc<RecordingPresenter>,
        contacts: Arc<InMemoryContacts>,
        controller: ExchangeController,
    }

    fn fixture_with_room(room: MockRoom) -> Fixture {
        let room = Arc::new(room);
        let presenter = Arc::new(RecordingPresenter::default());
        let contacts = Arc::new(InMemoryContacts::new());
        let codec = UriCodec::new("https://metaconnect.me").expect("origin");
        let profile = LocalProfile::new(
            "local",
            BTreeMap::from([("github".to_string(), "local".to_string())]),
        );
        let controller = ExchangeController::new(
            codec,
            profile,
            room.clone(),
            presenter.clone(),
            contacts.clone(),
        );
        Fixture {
            room,
            presenter,
            contacts,
            controller,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_room(MockRoom::connected())
    }

    fn peer_uri() -> String {
        let codec = UriCodec::new("https://metaconnect.me").expect("origin");
        let profile = LocalProfile::new(
            "remote",
            BTreeMap::from([("twitter".to_string(), "@remote".to_string())]),
        );
        codec.encode("peer-42", &profile).into()
    }

    #[test]
    fn scan_flow_sends_once_opens_once_and_ends_scan_mode() {
        let mut fx = fixture();
        fx.controller.toggle_mode();

        let outcome = fx.controller.handle_scan(&peer_uri()).expect("scan ok");

        let sent = fx.room.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "peer-42");
        let outbound: MetaConnection = serde_json::from_slice(&sent[0].1).expect("wire json");
        assert_eq!(outbound.name, "local");
        assert!(outbound.request);

        let shown = fx.presenter.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].name, "remote");
        assert!(shown[0].request);
        assert!(matches!(outcome, ScanOutcome::Completed(c) if c.name == "remote"));
        assert_eq!(fx.controller.mode(), ExchangeMode::Display);
    }

    #[test]
    fn scan_flow_opens_even_when_send_fails() {
        let mut fx = fixture_with_room(MockRoom::failing());
        fx.controller.toggle_mode();

        let outcome = fx.controller.handle_scan(&peer_uri()).expect("scan ok");

        assert!(matches!(outcome, ScanOutcome::Completed(_)));
        assert_eq!(fx.presenter.shown().len(), 1);
        assert_eq!(fx.controller.mode(), ExchangeMode::Display);
        // The failure was reported, not fatal.
        assert!(fx.presenter.notices().iter().any(|(_, is_error)| *is_error));
    }

    #[test]
    fn rejected_frame_notifies_and_keeps_scanning() {
        let mut fx = fixture();
        fx.controller.toggle_mode();

        let err = fx.controller.handle_scan("not a uri").unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::Uri(UriError::InvalidBootstrapString)
        ));
        assert_eq!(fx.controller.mode(), ExchangeMode::Scan);
        assert!(fx.room.sent().is_empty());
        assert!(fx.presenter.shown().is_empty());
        assert_eq!(fx.presenter.notices().len(), 1);

        // The next frame can still complete the exchange.
        fx.controller.handle_scan(&peer_uri()).expect("retry ok");
        assert_eq!(fx.controller.mode(), ExchangeMode::Display);
    }

    #[test]
    fn undecodable_uri_keeps_scanning_too() {
        let mut fx = fixture();
        fx.controller.toggle_mode();

        let err = fx
            .controller
            .handle_scan("https://metaconnect.me?id=1")
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Uri(UriError::MalformedUri(_))));
        assert_eq!(fx.controller.mode(), ExchangeMode::Scan);
    }

    #[test]
    fn scans_after_toggle_off_are_ignored() {
        let mut fx = fixture();

        let outcome = fx.controller.handle_scan(&peer_uri()).expect("no error");
        assert_eq!(outcome, ScanOutcome::Ignored);
        assert!(fx.room.sent().is_empty());
        assert!(fx.presenter.shown().is_empty());
    }

    #[test]
    fn listener_registers_once_per_established_transition() {
        let mut fx = fixture();

        assert!(fx.controller.handle_connection_update(true));
        // Re-renders that are not a false→true edge must not re-register.
        assert!(!fx.controller.handle_connection_update(true));
        assert!(!fx.controller.handle_connection_update(true));

        // A reconnect is a new transition.
        assert!(!fx.controller.handle_connection_update(false));
        assert!(fx.controller.handle_connection_update(true));
    }

    #[test]
    fn messages_before_registration_are_dropped() {
        let mut fx = fixture();

        let result = fx
            .controller
            .handle_room_message(r#"{"name":"early","socialMedia":{}}"#)
            .expect("no error");
        assert!(result.is_none());
        assert!(fx.presenter.shown().is_empty());
    }

    #[test]
    fn room_message_flow_is_passive() {
        let mut fx = fixture();
        fx.controller.handle_connection_update(true);

        let connection = fx
            .controller
            .handle_room_message(r#"{"name":"alice","socialMedia":{"github":"alice"}}"#)
            .expect("no error")
            .expect("connection");

        assert_eq!(connection.name, "alice");
        assert!(connection.request);
        assert_eq!(fx.presenter.shown().len(), 1);
        // Passive path: nothing goes back out.
        assert!(fx.room.sent().is_empty());
    }

    #[test]
    fn empty_room_payloads_are_no_ops() {
        let mut fx = fixture();
        fx.controller.handle_connection_update(true);

        assert!(fx.controller.handle_room_message("").expect("ok").is_none());
        assert!(fx.controller.handle_room_message("   ").expect("ok").is_none());
        assert!(fx.presenter.shown().is_empty());
    }

    #[test]
    fn malformed_room_payloads_surface_to_the_caller() {
        let mut fx = fixture();
        fx.controller.handle_connection_update(true);

        let err = fx.controller.handle_room_message("{not json").unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::Message(MessageError::MalformedMessage(_))
        ));
        assert!(fx.presenter.shown().is_empty());
    }

    #[test]
    fn bootstrap_uri_waits_for_a_usable_identity() {
        let fx = fixture_with_room(MockRoom::disconnected());
        assert!(fx.controller.bootstrap_uri().is_none());

        let fx = fixture();
        let uri = fx.controller.bootstrap_uri().expect("uri");
        let decoded = UriCodec::decode(uri.as_str()).expect("own uri decodes");
        assert_eq!(decoded.peer, "local-id");
        assert_eq!(decoded.connection.name, "local");
    }

    #[test]
    fn empty_room_identity_still_reads_as_loading() {
        let mut room = MockRoom::connected();
        room.user_id = Some(String::new());
        let fx = fixture_with_room(room);
        assert!(fx.controller.bootstrap_uri().is_none());
    }

    #[test]
    fn stored_contacts_open_resolved() {
        let fx = fixture();
        fx.contacts.insert(
            "carol",
            StoredEntry {
                name: "carol".into(),
                social_media: BTreeMap::from([("web".to_string(), "carol.dev".to_string())]),
            },
        );

        let connection = fx.controller.open_stored("carol").expect("stored");
        assert!(!connection.request);
        assert_eq!(connection.name, "carol");
        assert_eq!(fx.presenter.shown().len(), 1);
        assert_eq!(fx.controller.contact_count(), 1);
    }

    #[test]
    fn unknown_contacts_are_an_error() {
        let fx = fixture();
        let err = fx.controller.open_stored("nobody").unwrap_err();
        assert!(matches!(err, ExchangeError::UnknownContact(key) if key == "nobody"));
        assert!(fx.presenter.shown().is_empty());
    }

    #[test]
    fn toggle_is_a_strict_alternation() {
        let mut fx = fixture();
        assert_eq!(fx.controller.mode(), ExchangeMode::Display);
        fx.controller.toggle_mode();
        assert_eq!(fx.controller.mode(), ExchangeMode::Scan);
        fx.controller.toggle_mode();
        assert_eq!(fx.controller.mode(), ExchangeMode::Display);
    }
}
