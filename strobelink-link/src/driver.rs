//! Serial link driver
//!
//! Pumps a serial port through a [`LinkStateMachine`]: available bytes are
//! read in small chunks and fed to the machine, outgoing packets are written
//! back, and elapsed time drives SYNC probe retries.

use alloc::vec::Vec;

#[cfg(feature = "defmt")]
use defmt::{debug, info, trace, warn};

use strobelink_hal::{SerialRx, SerialTx};
use strobelink_protocol::{
    encode_sync_probe, HeaderKind, LinkError, LinkStateMachine, LinkStats, NoopObserver,
    Operation, Outcome, Payload, Role, TransitionObserver,
};

use crate::config::{ConfigError, LinkSettings};

/// Receive chunk size
pub const RX_CHUNK_SIZE: usize = 64;

/// Upper bound on chunks read per poll, so a chatty peer cannot starve the timer
pub const MAX_CHUNKS_PER_POLL: usize = 16;

/// Driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError<E> {
    /// Transport failure
    Serial(E),
    /// Link failure the caller has to handle
    Link(LinkError),
    /// Settings rejected at start
    Config(ConfigError),
}

impl<E> From<LinkError> for DriverError<E> {
    fn from(e: LinkError) -> Self {
        DriverError::Link(e)
    }
}

impl<E> From<ConfigError> for DriverError<E> {
    fn from(e: ConfigError) -> Self {
        DriverError::Config(e)
    }
}

/// Link driver owning the serial halves and the state machine
pub struct LinkDriver<Tx, Rx, O = NoopObserver> {
    tx: Tx,
    rx: Rx,
    machine: LinkStateMachine<O>,
    settings: LinkSettings,
    rx_buf: [u8; RX_CHUNK_SIZE],
    restarts: u32,
}

impl<Tx, Rx> LinkDriver<Tx, Rx, NoopObserver>
where
    Tx: SerialTx,
    Rx: SerialRx<Error = Tx::Error>,
{
    /// Initialize the link and send whatever the role starts with
    pub fn start(tx: Tx, rx: Rx, settings: LinkSettings) -> Result<Self, DriverError<Tx::Error>> {
        Self::start_with_observer(tx, rx, settings, NoopObserver)
    }
}

impl<Tx, Rx, O> LinkDriver<Tx, Rx, O>
where
    Tx: SerialTx,
    Rx: SerialRx<Error = Tx::Error>,
    O: TransitionObserver + Default,
{
    /// Like [`start`](LinkDriver::start), reporting transitions to `observer`
    pub fn start_with_observer(
        tx: Tx,
        rx: Rx,
        settings: LinkSettings,
        observer: O,
    ) -> Result<Self, DriverError<Tx::Error>> {
        settings.validate()?;
        let mut machine = LinkStateMachine::with_observer(settings.protocol, observer);
        let outcome = machine.initialize(settings.role)?;

        #[cfg(feature = "defmt")]
        info!(
            "link started as {} at {} baud",
            settings.role, settings.serial.baudrate
        );

        let mut driver = Self {
            tx,
            rx,
            machine,
            settings,
            rx_buf: [0; RX_CHUNK_SIZE],
            restarts: 0,
        };

        let mut delivered = Vec::new();
        driver.dispatch(outcome, &mut delivered)?;
        Ok(driver)
    }

    /// Read available bytes, advance the link and report elapsed time
    ///
    /// Returns the payloads received during this poll, in order.
    pub fn poll(&mut self, elapsed_ms: u32) -> Result<Vec<Payload>, DriverError<Tx::Error>> {
        let mut delivered = Vec::new();

        for _ in 0..MAX_CHUNKS_PER_POLL {
            let n = self.rx.read_available(&mut self.rx_buf).map_err(|e| {
                #[cfg(feature = "defmt")]
                warn!("link serial read failed");
                DriverError::Serial(e)
            })?;
            if n == 0 {
                break;
            }

            #[cfg(feature = "defmt")]
            trace!("link rx {} bytes", n);

            let outcome = self.machine.on_bytes_received(&self.rx_buf[..n])?;
            let outcome = self.restart_if_peer_resynced(outcome)?;
            self.dispatch(outcome, &mut delivered)?;
        }

        let outcome = self.machine.on_timer_tick(elapsed_ms)?;
        self.dispatch(outcome, &mut delivered)?;

        Ok(delivered)
    }

    /// Send one payload, returning its packet id
    pub fn send(&mut self, payload: &[u8]) -> Result<u16, DriverError<Tx::Error>> {
        let packet_id = self.machine.next_packet_id();
        let packet = self.machine.send_payload(payload)?;
        self.write(&packet)?;
        self.tx.flush().map_err(DriverError::Serial)?;

        #[cfg(feature = "defmt")]
        trace!("link sent packet {} ({} bytes)", packet_id, payload.len());

        Ok(packet_id)
    }

    pub fn is_synced(&self) -> bool {
        self.machine.is_synced()
    }

    pub fn stats(&self) -> &LinkStats {
        self.machine.stats()
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn machine(&self) -> &LinkStateMachine<O> {
        &self.machine
    }

    /// Number of times the session was restarted by a peer's SYNC probe
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn tx(&self) -> &Tx {
        &self.tx
    }

    pub fn rx(&self) -> &Rx {
        &self.rx
    }

    /// Release the serial halves
    pub fn into_parts(self) -> (Tx, Rx) {
        (self.tx, self.rx)
    }

    /// Write outgoing packets, confirm a pending SYNC reply and collect payloads
    fn dispatch(
        &mut self,
        outcome: Outcome,
        delivered: &mut Vec<Payload>,
    ) -> Result<(), DriverError<Tx::Error>> {
        let mut outcome = outcome;
        loop {
            for packet in &outcome.outgoing {
                self.write(packet)?;
            }
            if !outcome.outgoing.is_empty() {
                self.tx.flush().map_err(DriverError::Serial)?;
            }

            #[cfg(feature = "defmt")]
            for error in &outcome.recovered {
                debug!("link recovered from {}", error);
            }

            delivered.extend(outcome.delivered);

            // The reply was flushed above, so the handshake can complete
            if self.machine.next_operation().operation != Operation::SendSyncReply {
                return Ok(());
            }
            outcome = self.machine.sync_reply_sent()?;
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), DriverError<Tx::Error>> {
        self.tx.write_all(bytes).map_err(|e| {
            #[cfg(feature = "defmt")]
            warn!("link serial write failed");
            DriverError::Serial(e)
        })
    }

    /// Start a new session when a synced secondary sees a fresh SYNC probe
    ///
    /// The old machine rejects the probe; a new one is created with the
    /// same settings and observer, and answers it. Bytes the old machine
    /// had not finished parsing are replayed into the new one after the
    /// probe, so a frame split across reads survives the restart.
    fn restart_if_peer_resynced(
        &mut self,
        mut outcome: Outcome,
    ) -> Result<Outcome, DriverError<Tx::Error>> {
        let probe_seen = outcome.recovered.iter().any(|e| {
            matches!(
                e,
                LinkError::UnexpectedControlFrame {
                    kind: HeaderKind::SyncProbe
                }
            )
        });
        if !probe_seen
            || !self.settings.resync_on_probe
            || self.machine.role() != Some(Role::Secondary)
            || !self.machine.is_synced()
        {
            return Ok(outcome);
        }

        #[cfg(feature = "defmt")]
        warn!("link peer sent SYNC probe, restarting session");

        let config = *self.machine.config();
        let carried = self.machine.unparsed();
        let observer = core::mem::take(self.machine.observer_mut());
        self.machine = LinkStateMachine::with_observer(config, observer);

        outcome.merge(self.machine.initialize(Role::Secondary)?);
        outcome.merge(self.machine.on_bytes_received(&encode_sync_probe())?);
        if !carried.is_empty() {
            outcome.merge(self.machine.on_bytes_received(&carried)?);
        }
        self.restarts = self.restarts.saturating_add(1);

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::vec::Vec;
    use strobelink_hal::SerialError;
    use strobelink_protocol::{encode_sync_reply, Frame, ProtocolState, HEADER_SIZE};

    /// One direction of a serial line
    #[derive(Clone, Default)]
    struct Wire(Rc<RefCell<VecDeque<u8>>>);

    impl Wire {
        fn take(&self) -> Vec<u8> {
            self.0.borrow_mut().drain(..).collect()
        }

        fn inject(&self, bytes: &[u8]) {
            self.0.borrow_mut().extend(bytes.iter().copied());
        }

        fn len(&self) -> usize {
            self.0.borrow().len()
        }
    }

    impl SerialTx for Wire {
        type Error = SerialError;

        fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError> {
            self.inject(data);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), SerialError> {
            Ok(())
        }
    }

    impl SerialRx for Wire {
        type Error = SerialError;

        fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
            let mut queue = self.0.borrow_mut();
            let n = buf.len().min(queue.len());
            for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    /// Receiver that always fails
    struct Broken;

    impl SerialRx for Broken {
        type Error = SerialError;

        fn read_available(&mut self, _buf: &mut [u8]) -> Result<usize, SerialError> {
            Err(SerialError::Overrun)
        }
    }

    #[derive(Default)]
    struct Transitions(Vec<(ProtocolState, ProtocolState)>);

    impl TransitionObserver for Transitions {
        fn record(
            &mut self,
            _transition: strobelink_protocol::Transition,
            from: ProtocolState,
            to: ProtocolState,
        ) {
            self.0.push((from, to));
        }
    }

    type Driver = LinkDriver<Wire, Wire>;

    fn pair(secondary: LinkSettings) -> (Driver, Driver, Wire, Wire) {
        let to_secondary = Wire::default();
        let to_primary = Wire::default();

        let primary = LinkDriver::start(
            to_secondary.clone(),
            to_primary.clone(),
            LinkSettings::new(Role::Primary),
        )
        .unwrap();
        let secondary = LinkDriver::start(to_primary.clone(), to_secondary.clone(), secondary).unwrap();

        (primary, secondary, to_secondary, to_primary)
    }

    fn synced_pair() -> (Driver, Driver, Wire, Wire) {
        let (mut primary, mut secondary, a, b) = pair(LinkSettings::new(Role::Secondary));
        secondary.poll(0).unwrap();
        primary.poll(0).unwrap();
        assert!(primary.is_synced());
        assert!(secondary.is_synced());
        (primary, secondary, a, b)
    }

    #[test]
    fn test_start_writes_probe() {
        let (_primary, _secondary, to_secondary, to_primary) = pair(LinkSettings::new(Role::Secondary));
        assert_eq!(to_secondary.take(), encode_sync_probe().to_vec());
        assert_eq!(to_primary.len(), 0);
    }

    #[test]
    fn test_handshake_and_exchange() {
        let (mut primary, mut secondary, _, _) = synced_pair();

        let id = primary.send(&[0x0A, 0x2B, 0x30, 0x45]).unwrap();
        assert_eq!(id, 1);
        let received = secondary.poll(10).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(&received[0][..], &[0x0A, 0x2B, 0x30, 0x45]);

        assert_eq!(secondary.send(b"pong").unwrap(), 1);
        assert_eq!(primary.send(b"second").unwrap(), 2);
        let received = primary.poll(10).unwrap();
        assert_eq!(&received[0][..], b"pong");
        let received = secondary.poll(10).unwrap();
        assert_eq!(&received[0][..], b"second");

        assert_eq!(primary.stats().sync_probes_sent, 1);
        assert_eq!(secondary.stats().frames_received, 2);
    }

    #[test]
    fn test_probe_retry_without_peer() {
        let (mut primary, _secondary, to_secondary, _) = pair(LinkSettings::new(Role::Secondary));
        to_secondary.take();

        assert!(primary.poll(499).unwrap().is_empty());
        assert_eq!(to_secondary.len(), 0);

        primary.poll(1).unwrap();
        assert_eq!(to_secondary.take(), encode_sync_probe().to_vec());
        assert_eq!(primary.stats().sync_probes_sent, 2);
    }

    #[test]
    fn test_send_before_sync() {
        let (mut primary, _, _, _) = pair(LinkSettings::new(Role::Secondary));
        assert_eq!(primary.send(&[1]), Err(DriverError::Link(LinkError::NotSynced)));
    }

    #[test]
    fn test_long_stream_is_read_in_chunks() {
        let (mut primary, mut secondary, _, to_primary) = synced_pair();

        let mut expected = Vec::new();
        for i in 0..4u8 {
            let payload = [i; 200];
            secondary.send(&payload).unwrap();
            expected.push(payload.to_vec());
        }
        assert!(to_primary.len() > RX_CHUNK_SIZE * 4);

        let received: Vec<Vec<u8>> = primary.poll(0).unwrap().iter().map(|p| p.to_vec()).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_garbage_on_the_wire() {
        let (mut primary, mut secondary, to_secondary, _) = synced_pair();

        to_secondary.inject(&[0x00, 0x13, 0x37]);
        primary.send(&[7, 8, 9]).unwrap();

        let received = secondary.poll(0).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(secondary.stats().bytes_discarded, 3);
    }

    #[test]
    fn test_secondary_restarts_on_new_probe() {
        let (_old_primary, mut secondary, to_secondary, to_primary) = synced_pair();
        secondary.send(b"before").unwrap();
        to_primary.take();

        // Primary restarts on the same wires
        let mut primary = LinkDriver::start(
            to_secondary.clone(),
            to_primary.clone(),
            LinkSettings::new(Role::Primary),
        )
        .unwrap();
        assert!(!primary.is_synced());

        secondary.poll(0).unwrap();
        assert_eq!(secondary.restarts(), 1);
        assert!(secondary.is_synced());
        assert_eq!(to_primary.len(), HEADER_SIZE);

        primary.poll(0).unwrap();
        assert!(primary.is_synced());

        // Sequence restarts with the new session
        assert_eq!(secondary.send(b"after").unwrap(), 1);
        let received = primary.poll(0).unwrap();
        assert_eq!(&received[0][..], b"after");
    }

    #[test]
    fn test_duplicate_sync_then_data_across_chunks() {
        let (mut primary, mut secondary, to_secondary, to_primary) =
            pair(LinkSettings::new(Role::Secondary));
        secondary.poll(0).unwrap();
        let reply = to_primary.take();

        // Retry goes out while the first reply is still in flight
        primary.poll(500).unwrap();
        to_primary.inject(&reply);
        primary.poll(0).unwrap();
        assert!(primary.is_synced());

        primary.send(&[0x42; 100]).unwrap();
        assert!(to_secondary.len() > RX_CHUNK_SIZE);

        let received = secondary.poll(0).unwrap();
        assert_eq!(secondary.restarts(), 1);
        assert_eq!(received.len(), 1);
        assert_eq!(&received[0][..], &[0x42; 100]);
        assert_eq!(to_primary.take(), encode_sync_reply().to_vec());
    }

    #[test]
    fn test_restart_keeps_header_split_across_chunks() {
        let (mut primary, mut secondary, to_secondary, _) = synced_pair();

        // SYNC plus noise fills the first read up to two bytes into the header
        to_secondary.inject(&encode_sync_probe());
        to_secondary.inject(&[0x00; RX_CHUNK_SIZE - HEADER_SIZE - 2]);
        primary.send(b"split").unwrap();

        let received = secondary.poll(0).unwrap();
        assert_eq!(secondary.restarts(), 1);
        assert_eq!(received.len(), 1);
        assert_eq!(&received[0][..], b"split");
        assert_eq!(secondary.machine().buffered(), 0);
    }

    #[test]
    fn test_restart_keeps_observer() {
        let to_secondary = Wire::default();
        let to_primary = Wire::default();
        let mut secondary = LinkDriver::start_with_observer(
            to_primary.clone(),
            to_secondary.clone(),
            LinkSettings::new(Role::Secondary),
            Transitions::default(),
        )
        .unwrap();

        to_secondary.inject(&encode_sync_probe());
        secondary.poll(0).unwrap();
        let before = secondary.machine().observer().0.len();

        to_secondary.inject(&encode_sync_probe());
        secondary.poll(0).unwrap();
        assert_eq!(secondary.restarts(), 1);
        assert!(secondary.machine().observer().0.len() > before);
        assert_eq!(
            secondary.machine().observer().0.last(),
            Some(&(ProtocolState::WriteSyncReply, ProtocolState::Idle))
        );
    }

    #[test]
    fn test_resync_disabled() {
        let settings = LinkSettings {
            resync_on_probe: false,
            ..LinkSettings::new(Role::Secondary)
        };
        let (_, mut secondary, to_secondary, to_primary) = pair(settings);
        secondary.poll(0).unwrap();
        to_primary.take();

        to_secondary.inject(&encode_sync_probe());
        secondary.poll(0).unwrap();
        assert_eq!(secondary.restarts(), 0);
        assert_eq!(to_primary.len(), 0);
        assert_eq!(secondary.stats().header_errors, 1);
    }

    #[test]
    fn test_primary_ignores_resync_setting() {
        let (mut primary, _, _, to_primary) = synced_pair();
        to_primary.inject(&encode_sync_probe());
        primary.poll(0).unwrap();
        assert_eq!(primary.restarts(), 0);
        assert!(primary.is_synced());
    }

    #[test]
    fn test_manual_reply_confirmed_by_driver() {
        let mut settings = LinkSettings::new(Role::Secondary);
        settings.protocol = settings.protocol.with_manual_sync_reply();
        let (mut primary, mut secondary, _, to_primary) = pair(settings);

        secondary.poll(0).unwrap();
        assert!(secondary.is_synced());
        assert_eq!(secondary.machine().state(), ProtocolState::Idle);
        assert_eq!(to_primary.take(), encode_sync_reply().to_vec());

        to_primary.inject(&encode_sync_reply());
        primary.poll(0).unwrap();
        assert!(primary.is_synced());
    }

    #[test]
    fn test_start_rejects_retry_shorter_than_sync_round_trip() {
        let mut settings = LinkSettings::new(Role::Primary);
        settings.serial.baudrate = 1200;
        settings.protocol = settings.protocol.with_sync_retry_ms(50);

        let to_secondary = Wire::default();
        let result = LinkDriver::start(to_secondary.clone(), Wire::default(), settings);
        assert!(matches!(
            result,
            Err(DriverError::Config(ConfigError::InvalidRetryInterval))
        ));
        assert_eq!(to_secondary.len(), 0);
    }

    #[test]
    fn test_serial_error_propagates() {
        let mut driver =
            LinkDriver::start(Wire::default(), Broken, LinkSettings::new(Role::Secondary)).unwrap();
        assert_eq!(driver.poll(0), Err(DriverError::Serial(SerialError::Overrun)));
    }

    #[test]
    fn test_settings_from_toml() {
        let settings =
            crate::parse_settings("role = \"secondary\"\n[protocol]\nmax_payload_len = 8")
                .unwrap();
        let (mut primary, mut secondary, _, _) = pair(settings);
        secondary.poll(0).unwrap();
        primary.poll(0).unwrap();

        assert_eq!(
            secondary.send(&[0u8; 9]),
            Err(DriverError::Link(LinkError::PayloadTooLarge { length: 9, max: 8 }))
        );
        assert_eq!(secondary.settings().protocol.max_payload_len, 8);

        let frame = Frame::new(1, &[0u8; 8]).unwrap().encode_to_vec().unwrap();
        assert_eq!(secondary.send(&[0u8; 8]).unwrap(), 1);
        let (_, rx) = primary.into_parts();
        assert_eq!(rx.len(), frame.len());
    }
}
