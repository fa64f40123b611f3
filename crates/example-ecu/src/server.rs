//! Poll-driven ISO 14229 server on two ISO-TP links
//!
//! The server owns a physical and a functional [`IsoTpLink`] and performs no
//! I/O of its own: CAN frames come in through [`UdsServer::receive_frame`],
//! time advances through [`UdsServer::poll`], and frames go out through the
//! registered send callback.
//!
//! Responses are not sent from the receive path. A processed request leaves
//! its response pending and the next `poll` after the P2 timer expires puts
//! it on the physical link. While a response is pending no new request is
//! taken from the links.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use uds_harness::SendCallback;
use uds_isotp::{IsoTpLink, MAX_MESSAGE_LEN};

use crate::config::{ConfigError, EcuConfig};
use crate::uds::{
    negative_response, nrc, positive_response, reset_type, routine_sub_function, service_id,
    session_type, standard_did, SUPPRESS_POSITIVE_RESPONSE,
};

/// Negative response code returned by application hooks
pub type Nrc = u8;

/// Application side of the server: data identifiers and reset
pub trait ServerApp: Send {
    /// Record of one data identifier
    fn read_data(&mut self, did: u16) -> Result<Vec<u8>, Nrc>;

    fn write_data(&mut self, did: u16, record: &[u8]) -> Result<(), Nrc>;

    /// Called once, `hard_reset_delay_ms` after a hard reset was answered
    fn hard_reset(&mut self);
}

/// A registered RoutineControl routine
///
/// `stop` and `results` return `None` when the routine does not support
/// them, which the server answers with NRC 0x12.
pub trait Routine: Send {
    fn start(&mut self, option_record: &[u8]) -> Result<Vec<u8>, Nrc>;

    fn stop(&mut self, _option_record: &[u8]) -> Option<Result<Vec<u8>, Nrc>> {
        None
    }

    fn results(&mut self, _option_record: &[u8]) -> Option<Result<Vec<u8>, Nrc>> {
        None
    }
}

/// Target of RequestDownload / TransferData / RequestTransferExit
pub trait DownloadHandler: Send {
    /// Accept a download; returns maxNumberOfBlockLength
    fn request(&mut self, data_format: u8, address: u32, size: u32) -> Result<u16, Nrc>;

    fn transfer(&mut self, data: &[u8]) -> Result<(), Nrc>;

    fn exit(&mut self) -> Result<(), Nrc>;
}

#[derive(Debug)]
struct TransferState {
    next_counter: u8,
    blocks: u32,
}

/// `a` is strictly later than `b`, robust against wrap-around
fn time_after(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) < 0
}

pub struct UdsServer {
    config: EcuConfig,
    phys: IsoTpLink,
    func: IsoTpLink,
    send: Option<SendCallback>,
    app: Box<dyn ServerApp>,
    routines: BTreeMap<u16, Box<dyn Routine>>,
    download: Option<Box<dyn DownloadHandler>>,
    transfer: Option<TransferState>,
    session: u8,
    communication: (u8, u8),
    now_ms: u32,
    pending: Option<Vec<u8>>,
    p2_timer: u32,
    s3_timer: u32,
    reset_at: Option<u32>,
}

impl UdsServer {
    pub fn new(config: EcuConfig, app: Box<dyn ServerApp>) -> Result<Self, ConfigError> {
        let phys = IsoTpLink::new(config.physical_link()?);
        let func = IsoTpLink::new(config.functional_link()?);
        Ok(Self {
            config,
            phys,
            func,
            send: None,
            app,
            routines: BTreeMap::new(),
            download: None,
            transfer: None,
            session: session_type::DEFAULT,
            communication: (0x00, 0x00),
            now_ms: 0,
            pending: None,
            p2_timer: 0,
            s3_timer: 0,
            reset_at: None,
        })
    }

    pub fn register_routine(&mut self, routine_id: u16, routine: Box<dyn Routine>) {
        self.routines.insert(routine_id, routine);
    }

    pub fn set_download_handler(&mut self, handler: Box<dyn DownloadHandler>) {
        self.download = Some(handler);
    }

    pub fn set_send_callback(&mut self, callback: SendCallback) {
        self.send = Some(callback);
    }

    pub fn config(&self) -> &EcuConfig {
        &self.config
    }

    /// Current diagnostic session
    pub fn session(&self) -> u8 {
        self.session
    }

    /// Last CommunicationControl (controlType, communicationType)
    pub fn communication_state(&self) -> (u8, u8) {
        self.communication
    }

    pub fn has_pending_response(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_transfer_active(&self) -> bool {
        self.transfer.is_some()
    }

    /// Validate the configuration and reset all protocol state
    pub fn init(&mut self) -> Result<(), ConfigError> {
        self.config.validate()?;
        self.phys.reset();
        self.func.reset();
        self.session = session_type::DEFAULT;
        self.transfer = None;
        self.pending = None;
        self.reset_at = None;
        // A response may go out immediately after start
        self.p2_timer = self.now_ms.wrapping_sub(self.config.timing.p2_ms as u32);
        self.s3_timer = self.now_ms.wrapping_add(self.config.timing.s3_ms);
        info!(
            ecu = %self.config.id,
            phys_rx_id = format!("0x{:03X}", self.phys.rx_id()),
            func_rx_id = format!("0x{:03X}", self.func.rx_id()),
            tx_id = format!("0x{:03X}", self.phys.tx_id()),
            "UDS server initialized"
        );
        Ok(())
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Feed one CAN frame; frames for other ids are ignored
    pub fn receive_frame(&mut self, id: u32, data: &[u8]) {
        let now = self.now_ms as u64;
        let result = if id == self.phys.rx_id() {
            self.phys.on_frame(data, now)
        } else if id == self.func.rx_id() {
            self.func.on_frame(data, now)
        } else {
            return;
        };
        if let Err(e) = result {
            warn!(
                can_id = format!("0x{:03X}", id),
                data = %hex::encode_upper(data),
                error = %e,
                "Dropped ISO-TP frame"
            );
        }
        // Flow control has to go out without waiting for the next poll
        self.flush();
    }

    /// Advance timers to `now_ms`, send a due response or take the next request
    pub fn poll(&mut self, now_ms: u32) {
        self.now_ms = now_ms;
        let now = now_ms as u64;
        for link in [&mut self.phys, &mut self.func] {
            if let Err(e) = link.poll(now) {
                warn!(rx_id = format!("0x{:03X}", link.rx_id()), error = %e, "ISO-TP link error");
            }
        }
        self.flush();

        self.run_timers();

        if let Some(response) = self.pending.take() {
            if time_after(now_ms, self.p2_timer) {
                self.transmit(&response);
                self.p2_timer = now_ms.wrapping_add(self.config.timing.p2_ms as u32);
            } else {
                self.pending = Some(response);
            }
            return;
        }

        let request = self
            .phys
            .take_received()
            .map(|r| (r, false))
            .or_else(|| self.func.take_received().map(|r| (r, true)));
        if let Some((request, functional)) = request {
            debug!(
                request = %hex::encode_upper(&request),
                functional,
                "UDS request"
            );
            self.s3_timer = now_ms.wrapping_add(self.config.timing.s3_ms);
            self.pending = self.process_request(&request);
            self.p2_timer = now_ms.wrapping_add(self.config.timing.p2_ms as u32);
        }
    }

    fn run_timers(&mut self) {
        if let Some(at) = self.reset_at {
            if time_after(self.now_ms, at) {
                self.reset_at = None;
                info!(ecu = %self.config.id, "Performing hard reset");
                self.app.hard_reset();
                self.session = session_type::DEFAULT;
                self.transfer = None;
            }
        }

        if self.session != session_type::DEFAULT && time_after(self.now_ms, self.s3_timer) {
            info!(
                session = format!("0x{:02X}", self.session),
                "S3 timeout, returning to default session"
            );
            self.enter_session(session_type::DEFAULT);
        }
    }

    fn transmit(&mut self, response: &[u8]) {
        if let Err(e) = self.phys.send(response, self.now_ms as u64) {
            warn!(error = %e, "Failed to send UDS response");
            return;
        }
        debug!(response = %hex::encode_upper(response), "UDS response");
        self.flush();
    }

    fn flush(&mut self) {
        let tx_id = self.phys.tx_id();
        let frames: Vec<Vec<u8>> = self
            .phys
            .drain_outbound()
            .into_iter()
            .chain(self.func.drain_outbound())
            .collect();
        let Some(send) = &self.send else {
            if !frames.is_empty() {
                warn!(frames = frames.len(), "No send callback registered, frames dropped");
            }
            return;
        };
        for frame in frames {
            if send(tx_id, &frame) != 0 {
                warn!(
                    can_id = format!("0x{:03X}", tx_id),
                    data = %hex::encode_upper(&frame),
                    "Send callback rejected frame"
                );
            }
        }
    }

    // =========================================================================
    // Request dispatch
    // =========================================================================

    /// Process one UDS request; `None` means no response is sent
    pub fn process_request(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let (&sid, _) = request.split_first()?;

        if !self.config.is_enabled(sid) {
            debug!(service_id = format!("0x{:02X}", sid), "Service not enabled");
            return Some(negative_response(sid, nrc::SERVICE_NOT_SUPPORTED));
        }

        match sid {
            service_id::DIAGNOSTIC_SESSION_CONTROL => self.handle_session_control(request),
            service_id::ECU_RESET => self.handle_ecu_reset(request),
            service_id::READ_DATA_BY_ID => Some(self.handle_read_data_by_id(request)),
            service_id::COMMUNICATION_CONTROL => self.handle_communication_control(request),
            service_id::WRITE_DATA_BY_ID => Some(self.handle_write_data_by_id(request)),
            service_id::ROUTINE_CONTROL => Some(self.handle_routine_control(request)),
            service_id::REQUEST_DOWNLOAD => Some(self.handle_request_download(request)),
            service_id::TRANSFER_DATA => Some(self.handle_transfer_data(request)),
            service_id::REQUEST_TRANSFER_EXIT => Some(self.handle_request_transfer_exit()),
            service_id::TESTER_PRESENT => self.handle_tester_present(request),
            _ => Some(negative_response(sid, nrc::SERVICE_NOT_SUPPORTED)),
        }
    }

    fn enter_session(&mut self, session: u8) {
        if session == session_type::DEFAULT && self.transfer.take().is_some() {
            info!("Session reset to default: cleared active transfer");
        }
        self.session = session;
        self.s3_timer = self.now_ms.wrapping_add(self.config.timing.s3_ms);
    }

    fn handle_session_control(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let sid = service_id::DIAGNOSTIC_SESSION_CONTROL;
        if request.len() < 2 {
            return Some(negative_response(sid, nrc::INCORRECT_MESSAGE_LENGTH));
        }
        let session = request[1] & 0x4F;
        let suppress = request[1] & SUPPRESS_POSITIVE_RESPONSE != 0;

        match session {
            session_type::DEFAULT | session_type::PROGRAMMING | session_type::EXTENDED_DIAGNOSTIC => {
                self.enter_session(session);
                info!(session = format!("0x{:02X}", session), "Session changed");
                if suppress {
                    return None;
                }
                let p2 = self.config.timing.p2_ms.to_be_bytes();
                let p2_star = ((self.config.timing.p2_star_ms / 10).min(u16::MAX as u32) as u16)
                    .to_be_bytes();
                Some(positive_response(
                    sid,
                    &[session, p2[0], p2[1], p2_star[0], p2_star[1]],
                ))
            }
            _ => {
                debug!(session = format!("0x{:02X}", session), "Unsupported session type");
                Some(negative_response(sid, nrc::SUB_FUNCTION_NOT_SUPPORTED))
            }
        }
    }

    fn handle_ecu_reset(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let sid = service_id::ECU_RESET;
        if request.len() < 2 {
            return Some(negative_response(sid, nrc::INCORRECT_MESSAGE_LENGTH));
        }
        let reset = request[1] & 0x3F;
        let suppress = request[1] & SUPPRESS_POSITIVE_RESPONSE != 0;

        match reset {
            reset_type::HARD => {
                if self.reset_at.is_none() {
                    self.reset_at = Some(
                        self.now_ms
                            .wrapping_add(self.config.timing.hard_reset_delay_ms),
                    );
                }
                info!(
                    delay_ms = self.config.timing.hard_reset_delay_ms,
                    "Hard reset scheduled"
                );
            }
            reset_type::KEY_OFF_ON | reset_type::SOFT => {
                info!(reset_type = reset, "Reset acknowledged");
            }
            _ => return Some(negative_response(sid, nrc::SUB_FUNCTION_NOT_SUPPORTED)),
        }

        if suppress {
            return None;
        }
        Some(positive_response(sid, &[reset, 0x00]))
    }

    fn handle_read_data_by_id(&mut self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::READ_DATA_BY_ID;
        let dids = &request[1..];
        if dids.is_empty() || dids.len() % 2 != 0 {
            return negative_response(sid, nrc::INCORRECT_MESSAGE_LENGTH);
        }

        let mut payload = Vec::new();
        for chunk in dids.chunks_exact(2) {
            let did = u16::from_be_bytes([chunk[0], chunk[1]]);
            let record = if did == standard_did::ACTIVE_DIAGNOSTIC_SESSION {
                Ok(vec![self.session])
            } else {
                self.app.read_data(did)
            };
            match record {
                Ok(record) => {
                    payload.extend_from_slice(chunk);
                    payload.extend_from_slice(&record);
                }
                Err(code) => {
                    debug!(did = format!("0x{:04X}", did), nrc = code, "DID read rejected");
                    return negative_response(sid, code);
                }
            }
        }

        if payload.len() + 1 > MAX_MESSAGE_LEN {
            return negative_response(sid, nrc::RESPONSE_TOO_LONG);
        }
        positive_response(sid, &payload)
    }

    fn handle_communication_control(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let sid = service_id::COMMUNICATION_CONTROL;
        if request.len() < 3 {
            return Some(negative_response(sid, nrc::INCORRECT_MESSAGE_LENGTH));
        }
        let control_type = request[1] & 0x7F;
        let suppress = request[1] & SUPPRESS_POSITIVE_RESPONSE != 0;
        let communication_type = request[2];

        if control_type > 0x03 {
            return Some(negative_response(sid, nrc::SUB_FUNCTION_NOT_SUPPORTED));
        }
        if communication_type > 0x03 {
            return Some(negative_response(sid, nrc::REQUEST_OUT_OF_RANGE));
        }

        self.communication = (control_type, communication_type);
        info!(control_type, communication_type, "Communication control");
        if suppress {
            return None;
        }
        Some(positive_response(sid, &[control_type]))
    }

    fn handle_write_data_by_id(&mut self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::WRITE_DATA_BY_ID;
        if request.len() < 4 {
            return negative_response(sid, nrc::INCORRECT_MESSAGE_LENGTH);
        }
        let did = u16::from_be_bytes([request[1], request[2]]);
        match self.app.write_data(did, &request[3..]) {
            Ok(()) => {
                info!(did = format!("0x{:04X}", did), len = request.len() - 3, "DID written");
                positive_response(sid, &request[1..3])
            }
            Err(code) => negative_response(sid, code),
        }
    }

    fn handle_routine_control(&mut self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::ROUTINE_CONTROL;
        if request.len() < 4 {
            return negative_response(sid, nrc::INCORRECT_MESSAGE_LENGTH);
        }
        let control_type = request[1] & 0x7F;
        let routine_id = u16::from_be_bytes([request[2], request[3]]);
        let option_record = &request[4..];

        let Some(routine) = self.routines.get_mut(&routine_id) else {
            debug!(routine_id = format!("0x{:04X}", routine_id), "Unknown routine");
            return negative_response(sid, nrc::REQUEST_OUT_OF_RANGE);
        };

        let outcome = match control_type {
            routine_sub_function::START_ROUTINE => Some(routine.start(option_record)),
            routine_sub_function::STOP_ROUTINE => routine.stop(option_record),
            routine_sub_function::REQUEST_ROUTINE_RESULTS => routine.results(option_record),
            _ => None,
        };

        match outcome {
            Some(Ok(status_record)) => {
                info!(
                    routine_id = format!("0x{:04X}", routine_id),
                    control_type,
                    "Routine control"
                );
                let mut payload = vec![control_type, request[2], request[3]];
                payload.extend_from_slice(&status_record);
                positive_response(sid, &payload)
            }
            Some(Err(code)) => negative_response(sid, code),
            None => negative_response(sid, nrc::SUB_FUNCTION_NOT_SUPPORTED),
        }
    }

    fn handle_request_download(&mut self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::REQUEST_DOWNLOAD;
        if request.len() < 3 {
            return negative_response(sid, nrc::INCORRECT_MESSAGE_LENGTH);
        }
        let data_format = request[1];
        let addr_len_format = request[2];
        let size_len = (addr_len_format >> 4) as usize;
        let addr_len = (addr_len_format & 0x0F) as usize;

        if !(1..=4).contains(&size_len) || !(1..=4).contains(&addr_len) {
            return negative_response(sid, nrc::REQUEST_OUT_OF_RANGE);
        }
        if request.len() != 3 + addr_len + size_len {
            return negative_response(sid, nrc::INCORRECT_MESSAGE_LENGTH);
        }
        if self.transfer.is_some() {
            debug!("Download denied: transfer already in progress");
            return negative_response(sid, nrc::CONDITIONS_NOT_CORRECT);
        }
        let Some(handler) = self.download.as_mut() else {
            return negative_response(sid, nrc::UPLOAD_DOWNLOAD_NOT_ACCEPTED);
        };

        let be = |bytes: &[u8]| bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
        let address = be(&request[3..3 + addr_len]);
        let size = be(&request[3 + addr_len..]);

        let max_block_length = match handler.request(data_format, address, size) {
            Ok(max) => max,
            Err(code) => return negative_response(sid, code),
        };
        if max_block_length < 3 {
            return negative_response(sid, nrc::GENERAL_PROGRAMMING_FAILURE);
        }
        let max_block_length = max_block_length.min(MAX_MESSAGE_LEN as u16);

        info!(
            address = format!("0x{:08X}", address),
            size,
            max_block_length,
            "RequestDownload: initiating download"
        );
        self.transfer = Some(TransferState {
            next_counter: 1,
            blocks: 0,
        });

        let length = max_block_length.to_be_bytes();
        positive_response(sid, &[0x20, length[0], length[1]])
    }

    fn handle_transfer_data(&mut self, request: &[u8]) -> Vec<u8> {
        let sid = service_id::TRANSFER_DATA;
        if request.len() < 2 {
            return negative_response(sid, nrc::INCORRECT_MESSAGE_LENGTH);
        }
        let counter = request[1];

        let Some(handler) = self.download.as_mut() else {
            return negative_response(sid, nrc::UPLOAD_DOWNLOAD_NOT_ACCEPTED);
        };
        let Some(transfer) = self.transfer.as_mut() else {
            return negative_response(sid, nrc::REQUEST_SEQUENCE_ERROR);
        };

        if counter != transfer.next_counter {
            warn!(
                expected = transfer.next_counter,
                received = counter,
                "TransferData: wrong block sequence counter, transfer aborted"
            );
            self.transfer = None;
            return negative_response(sid, nrc::REQUEST_SEQUENCE_ERROR);
        }

        if let Err(code) = handler.transfer(&request[2..]) {
            return negative_response(sid, code);
        }
        transfer.next_counter = transfer.next_counter.wrapping_add(1);
        transfer.blocks += 1;
        debug!(block = counter, bytes = request.len() - 2, "TransferData: block received");

        positive_response(sid, &[counter])
    }

    fn handle_request_transfer_exit(&mut self) -> Vec<u8> {
        let sid = service_id::REQUEST_TRANSFER_EXIT;
        let Some(transfer) = self.transfer.take() else {
            return negative_response(sid, nrc::REQUEST_SEQUENCE_ERROR);
        };
        let Some(handler) = self.download.as_mut() else {
            return negative_response(sid, nrc::UPLOAD_DOWNLOAD_NOT_ACCEPTED);
        };

        match handler.exit() {
            Ok(()) => {
                info!(blocks = transfer.blocks, "RequestTransferExit: download complete");
                positive_response(sid, &[])
            }
            Err(code) => negative_response(sid, code),
        }
    }

    fn handle_tester_present(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let sid = service_id::TESTER_PRESENT;
        if request.len() < 2 {
            return Some(negative_response(sid, nrc::INCORRECT_MESSAGE_LENGTH));
        }
        let sub_function = request[1];
        if sub_function & 0x7F != 0 {
            return Some(negative_response(sid, nrc::SUB_FUNCTION_NOT_SUPPORTED));
        }
        if sub_function & SUPPRESS_POSITIVE_RESPONSE != 0 {
            debug!("Tester present (suppressed response)");
            return None;
        }

        debug!("Tester present");
        Some(positive_response(sid, &[sub_function & 0x3F]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::Arc;

    use parking_lot::Mutex;

    #[derive(Default)]
    struct Log {
        resets: u32,
        written: Vec<(u16, Vec<u8>)>,
    }

    struct TestApp(Arc<Mutex<Log>>);

    impl ServerApp for TestApp {
        fn read_data(&mut self, did: u16) -> Result<Vec<u8>, Nrc> {
            match did {
                0x0003 => Ok(vec![0x03, 0x00]),
                0x0008 => Ok((1..=20).collect()),
                0x0BAD => Err(nrc::CONDITIONS_NOT_CORRECT),
                _ => Err(nrc::REQUEST_OUT_OF_RANGE),
            }
        }

        fn write_data(&mut self, did: u16, record: &[u8]) -> Result<(), Nrc> {
            self.0.lock().written.push((did, record.to_vec()));
            Ok(())
        }

        fn hard_reset(&mut self) {
            self.0.lock().resets += 1;
        }
    }

    struct Echo;

    impl Routine for Echo {
        fn start(&mut self, option_record: &[u8]) -> Result<Vec<u8>, Nrc> {
            Ok(option_record.to_vec())
        }

        fn results(&mut self, _option_record: &[u8]) -> Option<Result<Vec<u8>, Nrc>> {
            Some(Err(nrc::REQUEST_SEQUENCE_ERROR))
        }
    }

    #[derive(Default)]
    struct Sink {
        data: Arc<Mutex<Vec<u8>>>,
        max: u16,
    }

    impl DownloadHandler for Sink {
        fn request(&mut self, _format: u8, _address: u32, _size: u32) -> Result<u16, Nrc> {
            Ok(self.max)
        }

        fn transfer(&mut self, data: &[u8]) -> Result<(), Nrc> {
            self.data.lock().extend_from_slice(data);
            Ok(())
        }

        fn exit(&mut self) -> Result<(), Nrc> {
            Ok(())
        }
    }

    fn server(config: EcuConfig) -> (UdsServer, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut server = UdsServer::new(config, Box::new(TestApp(log.clone()))).unwrap();
        server.register_routine(0xFF00, Box::new(Echo));
        server.init().unwrap();
        (server, log)
    }

    fn full() -> (UdsServer, Arc<Mutex<Log>>) {
        server(EcuConfig::with_all_services())
    }

    type Sent = Arc<Mutex<Vec<(u32, Vec<u8>)>>>;

    fn capture(server: &mut UdsServer) -> Sent {
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        server.set_send_callback(Box::new(move |id, data| {
            sink.lock().push((id, data.to_vec()));
            0
        }));
        sent
    }

    #[test]
    fn test_time_after_handles_wrap() {
        assert!(time_after(10, 5));
        assert!(!time_after(5, 5));
        assert!(!time_after(5, 10));
        assert!(time_after(3, u32::MAX - 3));
    }

    #[test]
    fn test_empty_request_ignored() {
        let (mut server, _) = full();
        assert_eq!(server.process_request(&[]), None);
    }

    #[rstest]
    #[case(&[0x27, 0x01])]
    #[case(&[0x85, 0x02])]
    fn test_unknown_service_not_supported(#[case] request: &[u8]) {
        let (mut server, _) = full();
        assert_eq!(
            server.process_request(request),
            Some(vec![0x7F, request[0], 0x11])
        );
    }

    #[test]
    fn test_disabled_service_not_supported() {
        let (mut server, _) = server(EcuConfig::default());
        assert_eq!(
            server.process_request(&[0x10, 0x03]),
            Some(vec![0x7F, 0x10, 0x11])
        );
        assert_eq!(server.session(), session_type::DEFAULT);
    }

    #[test]
    fn test_session_control_reports_timing() {
        let (mut server, _) = full();
        assert_eq!(
            server.process_request(&[0x10, 0x03]),
            Some(vec![0x50, 0x03, 0x00, 0x32, 0x00, 0xC8])
        );
        assert_eq!(server.session(), session_type::EXTENDED_DIAGNOSTIC);
    }

    #[rstest]
    #[case(&[0x10], 0x13)]
    #[case(&[0x10, 0x05], 0x12)]
    #[case(&[0x11], 0x13)]
    #[case(&[0x11, 0x05], 0x12)]
    #[case(&[0x22], 0x13)]
    #[case(&[0x22, 0x00, 0x03, 0x00], 0x13)]
    #[case(&[0x22, 0x12, 0x34], 0x31)]
    #[case(&[0x22, 0x0B, 0xAD], 0x22)]
    #[case(&[0x28, 0x00], 0x13)]
    #[case(&[0x28, 0x05, 0x01], 0x12)]
    #[case(&[0x28, 0x00, 0x04], 0x31)]
    #[case(&[0x2E, 0x00, 0x03], 0x13)]
    #[case(&[0x31, 0x01, 0xFF], 0x13)]
    #[case(&[0x31, 0x01, 0x12, 0x34], 0x31)]
    #[case(&[0x31, 0x02, 0xFF, 0x00], 0x12)]
    #[case(&[0x31, 0x03, 0xFF, 0x00], 0x24)]
    #[case(&[0x31, 0x04, 0xFF, 0x00], 0x12)]
    #[case(&[0x34, 0x00, 0x44, 0x00, 0x00, 0xF0, 0x00, 0x00, 0x00, 0x10, 0x00], 0x70)]
    #[case(&[0x34, 0x00, 0x55, 0x00], 0x31)]
    #[case(&[0x34, 0x00, 0x44, 0x00], 0x13)]
    #[case(&[0x36], 0x13)]
    #[case(&[0x36, 0x01, 0xAA], 0x70)]
    #[case(&[0x37], 0x24)]
    #[case(&[0x3E], 0x13)]
    #[case(&[0x3E, 0x01], 0x12)]
    fn test_negative_responses(#[case] request: &[u8], #[case] code: u8) {
        let (mut server, _) = full();
        assert_eq!(
            server.process_request(request),
            Some(vec![0x7F, request[0], code])
        );
    }

    #[test]
    fn test_suppress_positive_response() {
        let (mut server, _) = full();
        assert_eq!(server.process_request(&[0x10, 0x83]), None);
        assert_eq!(server.session(), session_type::EXTENDED_DIAGNOSTIC);
        assert_eq!(server.process_request(&[0x3E, 0x80]), None);
        assert_eq!(server.process_request(&[0x3E, 0x00]), Some(vec![0x7E, 0x00]));
    }

    #[test]
    fn test_read_multiple_dids() {
        let (mut server, _) = full();
        let mut expected = vec![0x62, 0x00, 0x03, 0x03, 0x00, 0x00, 0x08];
        expected.extend(1..=20u8);
        assert_eq!(
            server.process_request(&[0x22, 0x00, 0x03, 0x00, 0x08]),
            Some(expected)
        );
    }

    #[test]
    fn test_active_session_did() {
        let (mut server, _) = full();
        server.process_request(&[0x10, 0x02]);
        assert_eq!(
            server.process_request(&[0x22, 0xF1, 0x86]),
            Some(vec![0x62, 0xF1, 0x86, 0x02])
        );
    }

    #[test]
    fn test_write_data_by_identifier() {
        let (mut server, log) = full();
        assert_eq!(
            server.process_request(&[0x2E, 0x00, 0x02, 0x34, 0x12]),
            Some(vec![0x6E, 0x00, 0x02])
        );
        assert_eq!(log.lock().written, vec![(0x0002, vec![0x34, 0x12])]);
    }

    #[test]
    fn test_communication_control_recorded() {
        let (mut server, _) = full();
        assert_eq!(
            server.process_request(&[0x28, 0x03, 0x01]),
            Some(vec![0x68, 0x03])
        );
        assert_eq!(server.communication_state(), (0x03, 0x01));
    }

    #[test]
    fn test_routine_start_returns_status_record() {
        let (mut server, _) = full();
        assert_eq!(
            server.process_request(&[0x31, 0x01, 0xFF, 0x00, 0xAB, 0xCD]),
            Some(vec![0x71, 0x01, 0xFF, 0x00, 0xAB, 0xCD])
        );
    }

    #[test]
    fn test_download_sequence() {
        let (mut server, _) = full();
        let data = Arc::new(Mutex::new(Vec::new()));
        server.set_download_handler(Box::new(Sink {
            data: data.clone(),
            max: 0x1000,
        }));

        let request = [0x34, 0x00, 0x44, 0x00, 0x00, 0xF0, 0x00, 0x00, 0x00, 0x00, 0x04];
        // Clamped to the largest ISO-TP message
        assert_eq!(
            server.process_request(&request),
            Some(vec![0x74, 0x20, 0x0F, 0xFF])
        );
        assert!(server.is_transfer_active());
        assert_eq!(
            server.process_request(&request),
            Some(vec![0x7F, 0x34, 0x22])
        );

        assert_eq!(
            server.process_request(&[0x36, 0x01, 1, 2]),
            Some(vec![0x76, 0x01])
        );
        assert_eq!(
            server.process_request(&[0x36, 0x02, 3, 4]),
            Some(vec![0x76, 0x02])
        );
        assert_eq!(server.process_request(&[0x37]), Some(vec![0x77]));
        assert!(!server.is_transfer_active());
        assert_eq!(*data.lock(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_wrong_block_counter_aborts_transfer() {
        let (mut server, _) = full();
        server.set_download_handler(Box::new(Sink {
            max: 0x102,
            ..Sink::default()
        }));
        server.process_request(&[0x34, 0x00, 0x22, 0xF0, 0x00, 0x00, 0x10]);

        assert_eq!(
            server.process_request(&[0x36, 0x02, 0xAA]),
            Some(vec![0x7F, 0x36, 0x24])
        );
        assert!(!server.is_transfer_active());
        assert_eq!(
            server.process_request(&[0x36, 0x01, 0xAA]),
            Some(vec![0x7F, 0x36, 0x24])
        );
    }

    #[test]
    fn test_zero_block_length_is_programming_failure() {
        let (mut server, _) = full();
        server.set_download_handler(Box::new(Sink::default()));
        assert_eq!(
            server.process_request(&[0x34, 0x00, 0x11, 0xF0, 0x10]),
            Some(vec![0x7F, 0x34, 0x72])
        );
        assert!(!server.is_transfer_active());
    }

    #[test]
    fn test_response_held_until_p2_expires() {
        let (mut server, _) = full();
        let sent = capture(&mut server);

        server.poll(0);
        server.receive_frame(0x7A0, &[0x02, 0x3E, 0x00]);
        server.poll(10);
        assert!(server.has_pending_response());
        assert!(sent.lock().is_empty());

        server.poll(60);
        assert!(server.has_pending_response());
        server.poll(61);
        assert!(!server.has_pending_response());
        assert_eq!(*sent.lock(), vec![(0x7A8, vec![0x02, 0x7E, 0x00])]);
    }

    #[test]
    fn test_functional_request_answered_on_physical_id() {
        let (mut server, _) = full();
        let sent = capture(&mut server);

        server.receive_frame(0x7DF, &[0x02, 0x3E, 0x00]);
        server.poll(1);
        server.poll(100);
        assert_eq!(*sent.lock(), vec![(0x7A8, vec![0x02, 0x7E, 0x00])]);
    }

    #[test]
    fn test_frames_for_other_ids_ignored() {
        let (mut server, _) = full();
        let sent = capture(&mut server);
        server.receive_frame(0x123, &[0x02, 0x3E, 0x00]);
        server.poll(1);
        server.poll(100);
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn test_segmented_request_gets_flow_control_immediately() {
        let (mut server, log) = full();
        let sent = capture(&mut server);

        // WDBI 0x0008 with 20 bytes: 23 byte message
        server.receive_frame(0x7A0, &[0x10, 0x17, 0x2E, 0x00, 0x08, 1, 2, 3]);
        assert_eq!(*sent.lock(), vec![(0x7A8, vec![0x30, 0x08, 0x00])]);

        server.receive_frame(0x7A0, &[0x21, 4, 5, 6, 7, 8, 9, 10]);
        server.receive_frame(0x7A0, &[0x22, 11, 12, 13, 14, 15, 16, 17]);
        server.receive_frame(0x7A0, &[0x23, 18, 19, 20]);
        server.poll(1);
        assert_eq!(log.lock().written, vec![(0x0008, (1..=20).collect::<Vec<u8>>())]);
    }

    #[test]
    fn test_hard_reset_fires_once_after_delay() {
        let (mut server, log) = full();
        assert_eq!(server.process_request(&[0x11, 0x01]), Some(vec![0x51, 0x01, 0x00]));
        server.poll(50);
        assert_eq!(log.lock().resets, 0);
        server.poll(101);
        assert_eq!(log.lock().resets, 1);
        server.poll(500);
        assert_eq!(log.lock().resets, 1);
    }

    #[test]
    fn test_s3_timeout_returns_to_default_session() {
        let (mut server, _) = full();
        server.poll(0);
        server.process_request(&[0x10, 0x02]);
        assert_eq!(server.session(), session_type::PROGRAMMING);

        server.poll(4000);
        assert_eq!(server.session(), session_type::PROGRAMMING);
        server.poll(5001);
        assert_eq!(server.session(), session_type::DEFAULT);
    }

    #[test]
    fn test_tester_present_keeps_session_alive() {
        let (mut server, _) = full();
        let _sent = capture(&mut server);
        server.poll(0);
        server.process_request(&[0x10, 0x03]);

        server.poll(4000);
        server.receive_frame(0x7A0, &[0x02, 0x3E, 0x80]);
        server.poll(4001);
        server.poll(8000);
        assert_eq!(server.session(), session_type::EXTENDED_DIAGNOSTIC);
        server.poll(9002);
        assert_eq!(server.session(), session_type::DEFAULT);
    }

    #[test]
    fn test_init_rejects_colliding_ids() {
        let mut config = EcuConfig::with_all_services();
        config.addressing.tx_id = "0x7A0".into();
        let log = Arc::new(Mutex::new(Log::default()));
        let mut server = UdsServer::new(config, Box::new(TestApp(log))).unwrap();
        assert!(server.init().is_err());
    }
}
