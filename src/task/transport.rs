//! Broker transport task
//!
//! Keeps an MQTT session with the broker alive and pumps frames both ways:
//! queued telemetry goes out on the data topic, control frames from the
//! control topic are checked against the device identity and routed to the
//! alarm and vitals tasks. Packet handling is done by `rust-mqtt` (MQTT v5)
//! on top of whatever byte stream the [`Link`] provides.
//!
//! # Session lifecycle
//! 1. Open the byte stream (TCP on the device)
//! 2. CONNECT, wait for CONNACK
//! 3. SUBSCRIBE to the control topic, wait for SUBACK
//! 4. Pump until the stream breaks or keep-alive is lost
//!
//! Any failure in steps 1-3 closes the stream and retries after a fixed delay,
//! without limit. A broken session goes back to step 1.

use embassy_futures::select::{select3, Either3};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_timeout, Duration, Instant, Timer};
use embedded_io_async::{Error as _, ErrorKind, ErrorType, Read, Write};
use rand_core::RngCore;
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;

use crate::system::config::{
    BROKER_RESPONSE_TIMEOUT, CONNECT_RETRY_DELAY, KEEP_ALIVE, MQTT_PASSWORD, MQTT_USER, TOPIC_CONTROL, TOPIC_DATA,
};
use crate::system::event;
use crate::system::identity::DeviceIdentity;
use crate::system::protocol::{accept_control, Request, TelemetryMessage};

/// Size of each of the client's send and receive buffers
pub const MQTT_BUFFER: usize = 512;
const MAX_PROPERTIES: usize = 5;
/// Packet identifier of the control topic subscription
const SUBSCRIBE_PACKET_ID: u16 = 1;

/// Why a session could not be established or ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// The byte stream failed or was closed by the peer
    Io,
    /// No answer from the broker in time
    Timeout,
    /// The broker refused or rejected a request
    Broker,
    /// A ping went unanswered
    KeepAliveLost,
}

fn broker_error(code: ReasonCode) -> SessionError {
    match code {
        ReasonCode::NetworkError => SessionError::Io,
        _ => SessionError::Broker,
    }
}

/// Reconnectable byte stream to the broker
pub trait Link: Read + Write {
    /// Opens the stream; called again after `close` to reconnect
    async fn open(&mut self) -> Result<(), SessionError>;

    /// Closes the stream, discarding anything in flight
    async fn close(&mut self);
}

/// Credentials announced in CONNECT
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions<'a> {
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    /// Keep-alive announced in CONNECT, pings go out at half of it
    pub keep_alive: Duration,
    /// How long CONNACK, SUBACK and PINGRESP may take
    pub response_timeout: Duration,
    /// Pause between failed connection attempts
    pub retry_delay: Duration,
}

impl SessionTiming {
    pub const DEFAULT: Self = Self {
        keep_alive: KEEP_ALIVE,
        response_timeout: BROKER_RESPONSE_TIMEOUT,
        retry_delay: CONNECT_RETRY_DELAY,
    };
}

/// Routes a publish received from the broker.
///
/// Returns the request to act on, or `None` if the frame is dropped.
pub fn route_inbound(topic: &str, payload: &[u8], identity: DeviceIdentity) -> Option<Request> {
    if topic != TOPIC_CONTROL {
        debug!("Ignoring publish on unexpected topic");
        return None;
    }

    match accept_control(payload, identity) {
        Ok(request) => {
            info!("Control request: {:?}", request);
            Some(request)
        }
        Err(error) => {
            warn!("Dropping control frame: {:?}", error);
            None
        }
    }
}

/// Hands a request to the task that serves it
pub fn dispatch(request: Request) {
    match request {
        Request::SendUpdate => event::request_update(),
        Request::Reset => event::request_reset(),
    }
}

/// Packet identifier source for the client.
///
/// Only the control SUBSCRIBE ever carries an identifier, publishes are QoS 0.
struct PacketIds;

impl RngCore for PacketIds {
    fn next_u32(&mut self) -> u32 {
        u32::from(SUBSCRIBE_PACKET_ID)
    }

    fn next_u64(&mut self) -> u64 {
        u64::from(SUBSCRIBE_PACKET_ID)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Lends a link to the client for one session.
///
/// End of stream reads as a reset so the client sees the broker hang up.
struct LinkIo<'a, L>(&'a mut L);

impl<L: Link> ErrorType for LinkIo<'_, L> {
    type Error = ErrorKind;
}

impl<L: Link> Read for LinkIo<'_, L> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match self.0.read(buf).await {
            Ok(0) if !buf.is_empty() => Err(ErrorKind::ConnectionReset),
            Ok(n) => Ok(n),
            Err(error) => Err(error.kind()),
        }
    }
}

impl<L: Link> Write for LinkIo<'_, L> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0.write(buf).await.map_err(|error| error.kind())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.0.flush().await.map_err(|error| error.kind())
    }
}

type Client<'a, T> = MqttClient<'a, T, MAX_PROPERTIES, PacketIds>;

async fn subscribe<T: Read + Write>(client: &mut Client<'_, T>, timing: &SessionTiming) -> Result<(), SessionError> {
    with_timeout(timing.response_timeout, client.subscribe_to_topic(TOPIC_CONTROL))
        .await
        .map_err(|_| SessionError::Timeout)?
        .map_err(broker_error)
}

/// What woke the pump
enum Wake {
    Inbound(Option<Request>),
    Outbound(TelemetryMessage),
    Ping,
}

/// Pumps an established session until it breaks
async fn pump<T: Read + Write, M: RawMutex, const Q: usize>(
    client: &mut Client<'_, T>,
    telemetry: &Channel<M, TelemetryMessage, Q>,
    identity: DeviceIdentity,
    timing: &SessionTiming,
    dispatch: &mut impl FnMut(Request),
) -> SessionError {
    let ping_interval = timing.keep_alive / 2;
    let mut last_sent = Instant::now();

    loop {
        let wake = match select3(
            client.receive_message(),
            telemetry.receive(),
            Timer::at(last_sent + ping_interval),
        )
        .await
        {
            Either3::First(Ok((topic, payload))) => Wake::Inbound(route_inbound(topic, payload, identity)),
            Either3::First(Err(code)) => return broker_error(code),
            Either3::Second(message) => Wake::Outbound(message),
            Either3::Third(()) => Wake::Ping,
        };

        match wake {
            Wake::Inbound(Some(request)) => dispatch(request),
            Wake::Inbound(None) => {}
            Wake::Outbound(message) => {
                let frame = match message.encode() {
                    Ok(frame) => frame,
                    Err(error) => {
                        error!("Cannot encode {:?}: {:?}", message, error);
                        continue;
                    }
                };
                if let Err(code) = client
                    .send_message(TOPIC_DATA, frame.as_bytes(), QualityOfService::QoS0, false)
                    .await
                {
                    error!("Publish failed, dropping {:?}", message);
                    return broker_error(code);
                }
                debug!("Published {:?}", message);
                last_sent = Instant::now();
            }
            Wake::Ping => match with_timeout(timing.response_timeout, client.send_ping()).await {
                Ok(Ok(())) => last_sent = Instant::now(),
                Ok(Err(ReasonCode::NetworkError)) => return SessionError::Io,
                _ => return SessionError::KeepAliveLost,
            },
        }
    }
}

/// How one session attempt finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    SetupFailed(SessionError),
    Lost(SessionError),
}

impl SessionEnd {
    fn error(self) -> SessionError {
        match self {
            Self::SetupFailed(error) | Self::Lost(error) => error,
        }
    }
}

/// Opens the link and runs one session on it, start to finish
async fn session<L: Link, M: RawMutex, const Q: usize>(
    link: &mut L,
    options: &ConnectOptions<'_>,
    telemetry: &Channel<M, TelemetryMessage, Q>,
    identity: DeviceIdentity,
    timing: &SessionTiming,
    dispatch: &mut impl FnMut(Request),
) -> SessionEnd {
    if let Err(error) = link.open().await {
        return SessionEnd::SetupFailed(error);
    }

    let mut config = ClientConfig::new(MqttVersion::MQTTv5, PacketIds);
    config.add_client_id(options.client_id);
    if let Some(username) = options.username {
        config.add_username(username);
    }
    if let Some(password) = options.password {
        config.add_password(password);
    }
    config.add_max_subscribe_qos(QualityOfService::QoS0);
    config.max_packet_size = MQTT_BUFFER as u32;
    config.keep_alive = timing.keep_alive.as_secs().min(u64::from(u16::MAX)) as u16;

    let mut tx = [0u8; MQTT_BUFFER];
    let mut rx = [0u8; MQTT_BUFFER];
    let mut client = Client::new(LinkIo(link), &mut tx, MQTT_BUFFER, &mut rx, MQTT_BUFFER, config);

    let end = match with_timeout(timing.response_timeout, client.connect_to_broker()).await {
        Err(_) => return SessionEnd::SetupFailed(SessionError::Timeout),
        Ok(Err(code)) => return SessionEnd::SetupFailed(broker_error(code)),
        Ok(Ok(())) => match subscribe(&mut client, timing).await {
            Err(error) => SessionEnd::SetupFailed(error),
            Ok(()) => {
                info!("Subscribed to {}", TOPIC_CONTROL);
                SessionEnd::Lost(pump(&mut client, telemetry, identity, timing, dispatch).await)
            }
        },
    };

    if end.error() != SessionError::Io {
        match with_timeout(timing.response_timeout, client.disconnect()).await {
            Ok(Ok(())) => debug!("Sent DISCONNECT"),
            _ => debug!("DISCONNECT not delivered"),
        }
    }
    end
}

/// Result of [`connect_with_retry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Connection attempts it took to get the session up
    pub attempts: u32,
    /// Why the session ended
    pub ended: SessionError,
}

/// Retries every `timing.retry_delay` until a session comes up, then pumps it
/// until it breaks.
pub async fn connect_with_retry<L: Link, M: RawMutex, const Q: usize>(
    link: &mut L,
    options: &ConnectOptions<'_>,
    telemetry: &Channel<M, TelemetryMessage, Q>,
    identity: DeviceIdentity,
    timing: &SessionTiming,
    dispatch: &mut impl FnMut(Request),
) -> SessionOutcome {
    let mut attempts: u32 = 0;
    loop {
        attempts = attempts.saturating_add(1);
        let end = session(link, options, telemetry, identity, timing, dispatch).await;
        link.close().await;

        match end {
            SessionEnd::Lost(ended) => return SessionOutcome { attempts, ended },
            SessionEnd::SetupFailed(error) => {
                warn!(
                    "Connection attempt {} failed: {:?}, retrying in {} ms",
                    attempts,
                    error,
                    timing.retry_delay.as_millis()
                );
                Timer::after(timing.retry_delay).await;
            }
        }
    }
}

/// Transport task body: connect, pump, reconnect, forever
pub async fn run_transport<L: Link>(mut link: L, identity: DeviceIdentity) -> ! {
    let options = ConnectOptions {
        client_id: identity.as_str(),
        username: Some(MQTT_USER),
        password: Some(MQTT_PASSWORD),
    };
    let mut route = dispatch;

    loop {
        let outcome = connect_with_retry(
            &mut link,
            &options,
            &event::TELEMETRY_CHANNEL,
            identity,
            &SessionTiming::DEFAULT,
            &mut route,
        )
        .await;
        warn!(
            "Broker session ended after {} attempt(s): {:?}",
            outcome.attempts, outcome.ended
        );
    }
}

#[cfg(feature = "rp")]
pub use broker::BrokerLink;

#[cfg(feature = "rp")]
mod broker {
    use embassy_net::tcp::{Error as TcpError, TcpSocket};
    use embassy_net::{IpAddress, IpEndpoint, Stack};
    use embedded_io_async::{ErrorType, Read, Write};

    use super::{Link, SessionError};
    use crate::system::config::{KEEP_ALIVE, MQTT_BROKER, MQTT_PORT};

    /// TCP connection to the configured broker
    pub struct BrokerLink {
        stack: Stack<'static>,
        socket: TcpSocket<'static>,
    }

    impl BrokerLink {
        pub fn new(stack: Stack<'static>, rx_buffer: &'static mut [u8], tx_buffer: &'static mut [u8]) -> Self {
            let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
            // Comfortably longer than the ping interval
            socket.set_timeout(Some(KEEP_ALIVE));
            Self { stack, socket }
        }
    }

    impl ErrorType for BrokerLink {
        type Error = TcpError;
    }

    impl Read for BrokerLink {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            self.socket.read(buf).await
        }
    }

    impl Write for BrokerLink {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.socket.write(buf).await
        }

        async fn flush(&mut self) -> Result<(), Self::Error> {
            self.socket.flush().await
        }
    }

    impl Link for BrokerLink {
        async fn open(&mut self) -> Result<(), SessionError> {
            self.stack.wait_config_up().await;
            let [a, b, c, d] = MQTT_BROKER;
            let endpoint = IpEndpoint::new(IpAddress::v4(a, b, c, d), MQTT_PORT);
            self.socket.connect(endpoint).await.map_err(|error| {
                warn!("TCP connect failed: {:?}", error);
                SessionError::Io
            })
        }

        async fn close(&mut self) {
            self.socket.abort();
            if let Err(error) = self.socket.flush().await {
                debug!("TCP flush on close failed: {:?}", error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::event::tests::{lock_globals, reset_globals};
    use core::future::pending;
    use embassy_futures::block_on;
    use embassy_futures::select::{select, Either};
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use std::collections::VecDeque;

    const NODE: DeviceIdentity = DeviceIdentity::new("010101-1111");

    const CONNACK_OK: &[u8] = &[0x20, 0x03, 0x00, 0x00, 0x00];
    const CONNACK_NOT_AUTHORIZED: &[u8] = &[0x20, 0x03, 0x00, 0x87, 0x00];
    const SUBACK_OK: &[u8] = &[0x90, 0x04, 0x00, 0x01, 0x00, 0x00];
    const PINGREQ: &[u8] = &[0xC0, 0x00];
    const END_OF_STREAM: &[u8] = &[];

    /// Scripted broker: reads drain the script chunk by chunk, an empty chunk
    /// reads as end of stream and an exhausted script blocks forever
    #[derive(Default)]
    struct FakeLink {
        failing_opens: u32,
        opens: u32,
        closes: u32,
        script: VecDeque<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl FakeLink {
        fn scripted(chunks: &[&[u8]]) -> Self {
            Self {
                script: chunks.iter().map(|chunk| chunk.to_vec()).collect(),
                ..Self::default()
            }
        }
    }

    impl ErrorType for FakeLink {
        type Error = ErrorKind;
    }

    impl Read for FakeLink {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let Some(chunk) = self.script.front_mut() else {
                return pending().await;
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            chunk.drain(..n);
            if chunk.is_empty() {
                self.script.pop_front();
            }
            Ok(n)
        }
    }

    impl Write for FakeLink {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    impl Link for FakeLink {
        async fn open(&mut self) -> Result<(), SessionError> {
            self.opens += 1;
            if self.failing_opens > 0 {
                self.failing_opens -= 1;
                return Err(SessionError::Io);
            }
            Ok(())
        }

        async fn close(&mut self) {
            self.closes += 1;
        }
    }

    /// QoS 0 PUBLISH on the control topic, as the broker sends it
    fn control_publish(payload: &[u8]) -> Vec<u8> {
        let topic = TOPIC_CONTROL.as_bytes();
        let remaining = 2 + topic.len() + 1 + payload.len();
        assert!(remaining < 128);
        let mut packet = vec![0x30, remaining as u8, 0x00, topic.len() as u8];
        packet.extend_from_slice(topic);
        packet.push(0x00);
        packet.extend_from_slice(payload);
        packet
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|window| window == needle)
    }

    fn options() -> ConnectOptions<'static> {
        ConnectOptions {
            client_id: "010101-1111",
            username: Some("user"),
            password: Some("secret"),
        }
    }

    fn timing() -> SessionTiming {
        SessionTiming {
            keep_alive: Duration::from_secs(60),
            response_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_millis(1),
        }
    }

    fn connect(link: &mut FakeLink, timing: &SessionTiming, requests: &mut Vec<Request>) -> SessionOutcome {
        let telemetry = Channel::<CriticalSectionRawMutex, TelemetryMessage, 4>::new();
        block_on(connect_with_retry(link, &options(), &telemetry, NODE, timing, &mut |r| {
            requests.push(r)
        }))
    }

    #[test]
    fn routes_only_control_frames_for_this_node() {
        assert_eq!(route_inbound(TOPIC_CONTROL, b"reset:010101-1111", NODE), Some(Request::Reset));
        assert_eq!(
            route_inbound(TOPIC_CONTROL, b"send_update:010101-1111", NODE),
            Some(Request::SendUpdate)
        );
        assert_eq!(route_inbound(TOPIC_CONTROL, b"send_update:999", NODE), None);
        assert_eq!(route_inbound(TOPIC_CONTROL, b"send_update", NODE), None);
        assert_eq!(route_inbound(TOPIC_DATA, b"reset:010101-1111", NODE), None);
    }

    #[test]
    fn session_connects_then_subscribes() {
        let mut link = FakeLink::scripted(&[CONNACK_OK, SUBACK_OK, END_OF_STREAM]);
        let mut requests = Vec::new();

        let outcome = connect(&mut link, &timing(), &mut requests);
        assert_eq!(
            outcome,
            SessionOutcome {
                attempts: 1,
                ended: SessionError::Io
            }
        );
        assert_eq!((link.opens, link.closes), (1, 1));
        assert_eq!(link.sent[0], 0x10);
        let client_id = find(&link.sent, b"010101-1111").unwrap();
        let subscription = find(&link.sent, TOPIC_CONTROL.as_bytes()).unwrap();
        assert!(client_id < subscription);
        assert!(requests.is_empty());
    }

    #[test]
    fn retries_until_the_link_comes_up() {
        let mut link = FakeLink {
            failing_opens: 3,
            ..FakeLink::scripted(&[CONNACK_OK, SUBACK_OK, END_OF_STREAM])
        };

        let outcome = connect(&mut link, &timing(), &mut Vec::new());
        assert_eq!(outcome.attempts, 4);
        assert_eq!(link.opens, 4);
        assert_eq!(link.closes, 4);
    }

    #[test]
    fn refused_attempt_is_retried() {
        let mut link = FakeLink::scripted(&[CONNACK_NOT_AUTHORIZED, CONNACK_OK, SUBACK_OK, END_OF_STREAM]);

        let outcome = connect(&mut link, &timing(), &mut Vec::new());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.ended, SessionError::Io);
    }

    #[test]
    fn session_dispatches_control_frames_until_closed() {
        let reset = control_publish(b"reset:010101-1111");
        let foreign = control_publish(b"send_update:999");
        let update = control_publish(b"send_update:010101-1111");
        // Two frames in one read, the last one split across reads
        let mut joined = reset.clone();
        joined.extend_from_slice(&foreign);
        let (head, tail) = update.split_at(5);

        let chunks: [&[u8]; 6] = [CONNACK_OK, SUBACK_OK, &joined, head, tail, END_OF_STREAM];
        let mut link = FakeLink::scripted(&chunks);
        let mut requests = Vec::new();

        let outcome = connect(&mut link, &timing(), &mut requests);
        assert_eq!(outcome.ended, SessionError::Io);
        assert_eq!(requests, vec![Request::Reset, Request::SendUpdate]);
    }

    #[test]
    fn session_publishes_telemetry_and_drops_on_unanswered_ping() {
        let mut link = FakeLink::scripted(&[CONNACK_OK, SUBACK_OK]);
        let telemetry = Channel::<CriticalSectionRawMutex, TelemetryMessage, 4>::new();
        telemetry.try_send(TelemetryMessage::Help { id: NODE }).unwrap();
        let timing = SessionTiming {
            keep_alive: Duration::from_millis(40),
            response_timeout: Duration::from_millis(30),
            ..timing()
        };

        let outcome = block_on(connect_with_retry(
            &mut link,
            &options(),
            &telemetry,
            NODE,
            &timing,
            &mut |_| {},
        ));
        assert_eq!(outcome.ended, SessionError::KeepAliveLost);

        let published = find(&link.sent, b"HELP:010101-1111").unwrap();
        let ping = find(&link.sent, PINGREQ).unwrap();
        assert!(published < ping);
        // DISCONNECT goes out before the link is closed
        assert_eq!(link.sent[ping + PINGREQ.len()], 0xE0);
        assert_eq!(link.closes, 1);
    }

    #[test]
    fn transport_task_routes_update_requests() {
        let _globals = lock_globals();
        reset_globals();

        let update = control_publish(b"send_update:010101-1111");
        let chunks: [&[u8]; 3] = [CONNACK_OK, SUBACK_OK, &update];
        let link = FakeLink::scripted(&chunks);

        let finished = block_on(select(run_transport(link, NODE), event::wait_update_request()));
        assert!(matches!(finished, Either::Second(())));
    }
}
