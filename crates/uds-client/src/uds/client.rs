//! UDS client: request/response handling and typed service calls

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::dtc::{self, Dtc};
use super::{service_id, NegativeResponseCode, UdsError, SUPPRESS_POSITIVE_RESPONSE};
use crate::codec::{DidCodec, DidValue};
use crate::config::ClientConfig;
use crate::transport::TransportAdapter;

/// How a server answered one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    Positive,
    Negative(NegativeResponseCode),
    /// Too short or otherwise malformed
    Invalid(String),
    /// Well formed but not an answer to the request
    Unexpected(String),
}

/// A response as received, with its classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdsResponse {
    /// Service the request was for
    pub service_id: u8,
    pub status: ResponseStatus,
    /// Complete response bytes, response SID included
    pub raw: Vec<u8>,
}

impl UdsResponse {
    pub fn is_positive(&self) -> bool {
        self.status == ResponseStatus::Positive
    }

    /// Response bytes after the response SID
    pub fn payload(&self) -> &[u8] {
        self.raw.get(1..).unwrap_or(&[])
    }

    fn into_error(self) -> UdsError {
        match self.status {
            ResponseStatus::Negative(nrc) => UdsError::NegativeResponse {
                service_id: self.service_id,
                nrc,
            },
            ResponseStatus::Invalid(reason) => UdsError::InvalidResponse(reason),
            ResponseStatus::Unexpected(reason) => UdsError::UnexpectedResponse(reason),
            ResponseStatus::Positive => UdsError::UnexpectedResponse(
                "Positive response treated as an error".to_string(),
            ),
        }
    }
}

/// Timing parameters announced by DiagnosticSessionControl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub session: u8,
    pub p2: Duration,
    pub p2_star: Duration,
}

/// Result of RoutineControl (0x31)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineResult {
    pub control_type: u8,
    pub routine_id: u16,
    /// routineInfo byte, when the server sent one
    pub info: Option<u8>,
    pub status_record: Vec<u8>,
}

/// Memory address and size of a download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLocation {
    pub address: u32,
    pub size: u32,
    /// Bytes used to encode the address (1..=4)
    pub address_len: u8,
    /// Bytes used to encode the size (1..=4)
    pub size_len: u8,
}

impl MemoryLocation {
    /// Four-byte address and size
    pub fn new(address: u32, size: u32) -> Self {
        Self {
            address,
            size,
            address_len: 4,
            size_len: 4,
        }
    }

    pub fn with_lengths(
        address: u32,
        size: u32,
        address_len: u8,
        size_len: u8,
    ) -> Result<Self, UdsError> {
        for (name, len, value) in [("address", address_len, address), ("size", size_len, size)] {
            if !(1..=4).contains(&len) || (len < 4 && value >> (u32::from(len) * 8) != 0) {
                return Err(UdsError::Config(format!(
                    "{} 0x{:X} does not fit in {} bytes",
                    name, value, len
                )));
            }
        }
        Ok(Self {
            address,
            size,
            address_len,
            size_len,
        })
    }

    /// addressAndLengthFormatIdentifier
    pub fn format_identifier(&self) -> u8 {
        (self.size_len << 4) | self.address_len
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.format_identifier());
        out.extend_from_slice(&self.address.to_be_bytes()[4 - self.address_len as usize..]);
        out.extend_from_slice(&self.size.to_be_bytes()[4 - self.size_len as usize..]);
    }
}

/// Result of RequestDownload (0x34)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadResponse {
    /// maxNumberOfBlockLength: largest TransferData request, SID and counter included
    pub max_block_length: usize,
}

/// UDS client over any [`TransportAdapter`]
///
/// [`UdsClient::request`] is the raw path: it classifies the response and
/// turns it into an error according to the `exception_on_*` flags. The typed
/// service methods build on it and always require a positive response.
#[derive(Clone)]
pub struct UdsClient {
    transport: Arc<dyn TransportAdapter>,
    config: ClientConfig,
    codecs: BTreeMap<u16, DidCodec>,
}

impl UdsClient {
    pub fn new(
        transport: Arc<dyn TransportAdapter>,
        config: ClientConfig,
    ) -> Result<Self, UdsError> {
        let codecs = config.did_codecs()?;
        Ok(Self {
            transport,
            config,
            codecs,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn TransportAdapter> {
        &self.transport
    }

    /// Layout configured for a data identifier
    pub fn codec(&self, did: u16) -> Option<&DidCodec> {
        self.codecs.get(&did)
    }

    // =========================================================================
    // Raw request path
    // =========================================================================

    /// Send a request and classify the response
    pub async fn request(&self, request: &[u8]) -> Result<UdsResponse, UdsError> {
        let sid = *request
            .first()
            .ok_or_else(|| UdsError::InvalidResponse("Empty request".to_string()))?;

        let raw = self
            .transport
            .send_receive(request, self.config.request_timeout())
            .await?;
        let response = classify(sid, raw);

        tracing::debug!(
            service = format!("0x{:02X}", sid),
            status = ?response.status,
            response = %hex::encode_upper(&response.raw),
            "UDS response"
        );

        let raise = match &response.status {
            ResponseStatus::Positive => false,
            ResponseStatus::Negative(_) => self.config.exception_on_negative_response,
            ResponseStatus::Invalid(_) => self.config.exception_on_invalid_response,
            ResponseStatus::Unexpected(_) => self.config.exception_on_unexpected_response,
        };
        if raise {
            return Err(response.into_error());
        }
        Ok(response)
    }

    /// Send a request that must be answered positively; returns the payload
    async fn positive(&self, request: &[u8]) -> Result<Vec<u8>, UdsError> {
        let response = self.request(request).await?;
        if !response.is_positive() {
            return Err(response.into_error());
        }
        Ok(response.payload().to_vec())
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// DiagnosticSessionControl (0x10)
    pub async fn change_session(&self, session: u8) -> Result<SessionTiming, UdsError> {
        let payload = self
            .positive(&[service_id::DIAGNOSTIC_SESSION_CONTROL, session])
            .await?;
        if payload.len() < 5 {
            return Err(UdsError::InvalidResponse(format!(
                "Session response too short: {} bytes",
                payload.len()
            )));
        }
        expect_echo("session", session, payload[0])?;

        Ok(SessionTiming {
            session: payload[0],
            p2: Duration::from_millis(u16::from_be_bytes([payload[1], payload[2]]) as u64),
            p2_star: Duration::from_millis(
                u16::from_be_bytes([payload[3], payload[4]]) as u64 * 10,
            ),
        })
    }

    /// ECUReset (0x11); returns the power down time when the server sent one
    pub async fn ecu_reset(&self, reset_type: u8) -> Result<Option<u8>, UdsError> {
        let payload = self.positive(&[service_id::ECU_RESET, reset_type]).await?;
        let echoed = *payload
            .first()
            .ok_or_else(|| UdsError::InvalidResponse("Reset response too short".to_string()))?;
        expect_echo("reset type", reset_type, echoed)?;
        Ok(payload.get(1).copied())
    }

    /// ReadDataByIdentifier (0x22), decoded with the configured layouts
    pub async fn read_data_by_identifier(
        &self,
        dids: &[u16],
    ) -> Result<BTreeMap<u16, DidValue>, UdsError> {
        if dids.is_empty() {
            return Err(UdsError::Config("No data identifier requested".to_string()));
        }
        for did in dids {
            if !self.codecs.contains_key(did) {
                return Err(UdsError::Config(format!(
                    "No codec configured for DID 0x{:04X}",
                    did
                )));
            }
        }

        let mut request = vec![service_id::READ_DATA_BY_ID];
        for did in dids {
            request.extend_from_slice(&did.to_be_bytes());
        }
        let payload = self.positive(&request).await?;
        self.decode_read_response(dids, &payload)
    }

    /// ReadDataByIdentifier for one DID
    pub async fn read_did(&self, did: u16) -> Result<DidValue, UdsError> {
        let mut values = self.read_data_by_identifier(&[did]).await?;
        values
            .remove(&did)
            .ok_or_else(|| UdsError::UnexpectedResponse(format!("DID 0x{:04X} missing", did)))
    }

    fn decode_read_response(
        &self,
        requested: &[u16],
        payload: &[u8],
    ) -> Result<BTreeMap<u16, DidValue>, UdsError> {
        let tolerate_padding = self.config.tolerate_zero_padding;
        let mut values = BTreeMap::new();
        let mut offset = 0;

        while offset < payload.len() {
            let rest = &payload[offset..];
            let is_padding = tolerate_padding && rest.iter().all(|b| *b == 0);
            if rest.len() < 2 {
                if is_padding {
                    break;
                }
                return Err(UdsError::InvalidResponse(format!(
                    "Truncated DID at offset {}",
                    offset
                )));
            }

            let did = u16::from_be_bytes([rest[0], rest[1]]);
            if !requested.contains(&did) {
                if is_padding {
                    break;
                }
                return Err(UdsError::UnexpectedResponse(format!(
                    "Server returned DID 0x{:04X} that was not requested",
                    did
                )));
            }

            let codec = self.codecs.get(&did).ok_or_else(|| {
                UdsError::Config(format!("No codec configured for DID 0x{:04X}", did))
            })?;
            let record = rest.get(2..2 + codec.len()).ok_or_else(|| {
                UdsError::InvalidResponse(format!(
                    "DID 0x{:04X} record needs {} bytes, {} left",
                    did,
                    codec.len(),
                    rest.len() - 2
                ))
            })?;
            values.insert(did, codec.decode(record)?);
            offset += 2 + codec.len();
        }

        if let Some(missing) = requested.iter().find(|did| !values.contains_key(did)) {
            return Err(UdsError::UnexpectedResponse(format!(
                "DID 0x{:04X} missing from response",
                missing
            )));
        }
        Ok(values)
    }

    /// WriteDataByIdentifier (0x2E), encoding `values` with the DID's layout
    pub async fn write_data_by_identifier(
        &self,
        did: u16,
        values: &[i128],
    ) -> Result<(), UdsError> {
        let codec = self.codecs.get(&did).ok_or_else(|| {
            UdsError::Config(format!("No codec configured for DID 0x{:04X}", did))
        })?;
        let record = codec.encode(values)?;
        self.write_data_raw(did, &record).await
    }

    /// WriteDataByIdentifier (0x2E) with a pre-encoded record
    pub async fn write_data_raw(&self, did: u16, record: &[u8]) -> Result<(), UdsError> {
        let mut request = vec![service_id::WRITE_DATA_BY_ID];
        request.extend_from_slice(&did.to_be_bytes());
        request.extend_from_slice(record);

        let payload = self.positive(&request).await?;
        match payload.as_slice() {
            [hi, lo, ..] if u16::from_be_bytes([*hi, *lo]) == did => Ok(()),
            _ => Err(UdsError::InvalidResponse(format!(
                "Write response does not echo DID 0x{:04X}",
                did
            ))),
        }
    }

    /// TesterPresent (0x3E)
    ///
    /// With `suppress_response` the request is only sent; no answer is awaited.
    pub async fn tester_present(&self, suppress_response: bool) -> Result<(), UdsError> {
        if suppress_response {
            self.transport
                .send(&[service_id::TESTER_PRESENT, SUPPRESS_POSITIVE_RESPONSE])
                .await?;
            return Ok(());
        }
        self.positive(&[service_id::TESTER_PRESENT, 0x00]).await?;
        Ok(())
    }

    /// CommunicationControl (0x28)
    pub async fn communication_control(
        &self,
        control_type: u8,
        communication_type: u8,
    ) -> Result<(), UdsError> {
        let payload = self
            .positive(&[
                service_id::COMMUNICATION_CONTROL,
                control_type,
                communication_type,
            ])
            .await?;
        let echoed = *payload.first().ok_or_else(|| {
            UdsError::InvalidResponse("CommunicationControl response too short".to_string())
        })?;
        expect_echo("control type", control_type, echoed)
    }

    /// RoutineControl (0x31)
    pub async fn routine_control(
        &self,
        control_type: u8,
        routine_id: u16,
        data: &[u8],
    ) -> Result<RoutineResult, UdsError> {
        let mut request = vec![service_id::ROUTINE_CONTROL, control_type];
        request.extend_from_slice(&routine_id.to_be_bytes());
        request.extend_from_slice(data);

        let payload = self.positive(&request).await?;
        if payload.len() < 3 {
            return Err(UdsError::InvalidResponse(format!(
                "Routine response too short: {} bytes",
                payload.len()
            )));
        }
        expect_echo("routine control type", control_type, payload[0])?;
        let echoed_id = u16::from_be_bytes([payload[1], payload[2]]);
        if echoed_id != routine_id {
            return Err(UdsError::InvalidResponse(format!(
                "Routine response for 0x{:04X}, expected 0x{:04X}",
                echoed_id, routine_id
            )));
        }

        Ok(RoutineResult {
            control_type,
            routine_id,
            info: payload.get(3).copied(),
            status_record: payload.get(4..).unwrap_or(&[]).to_vec(),
        })
    }

    /// RequestDownload (0x34)
    pub async fn request_download(
        &self,
        location: MemoryLocation,
        data_format: u8,
    ) -> Result<DownloadResponse, UdsError> {
        let mut request = vec![service_id::REQUEST_DOWNLOAD, data_format];
        location.encode(&mut request);

        let payload = self.positive(&request).await?;
        let format = *payload
            .first()
            .ok_or_else(|| UdsError::InvalidResponse("Download response too short".to_string()))?;
        let len = (format >> 4) as usize;
        let bytes = payload
            .get(1..1 + len)
            .filter(|b| (1..=8).contains(&b.len()))
            .ok_or_else(|| {
                UdsError::InvalidResponse(format!(
                    "Invalid maxNumberOfBlockLength of {} bytes",
                    len
                ))
            })?;
        let max_block_length = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);

        Ok(DownloadResponse { max_block_length })
    }

    /// TransferData (0x36); returns the transferResponseParameterRecord
    pub async fn transfer_data(
        &self,
        block_counter: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, UdsError> {
        let mut request = Vec::with_capacity(data.len() + 2);
        request.push(service_id::TRANSFER_DATA);
        request.push(block_counter);
        request.extend_from_slice(data);

        let payload = self.positive(&request).await?;
        let echoed = *payload
            .first()
            .ok_or_else(|| UdsError::InvalidResponse("Transfer response too short".to_string()))?;
        expect_echo("block sequence counter", block_counter, echoed)?;
        Ok(payload[1..].to_vec())
    }

    /// RequestTransferExit (0x37)
    pub async fn request_transfer_exit(&self, data: &[u8]) -> Result<Vec<u8>, UdsError> {
        let mut request = vec![service_id::REQUEST_TRANSFER_EXIT];
        request.extend_from_slice(data);
        self.positive(&request).await
    }

    /// ReadDTCInformation (0x19 0x02), report DTCs by status mask
    pub async fn read_dtc_by_status_mask(&self, status_mask: u8) -> Result<Vec<Dtc>, UdsError> {
        let response = self
            .request(&[
                service_id::READ_DTC_INFO,
                dtc::sub_function::REPORT_DTC_BY_STATUS_MASK,
                status_mask,
            ])
            .await?;
        if !response.is_positive() {
            return Err(response.into_error());
        }
        let (_, dtcs) =
            dtc::parse_dtc_by_status_mask_response(&response.raw, self.config.ignore_all_zero_dtc)
                .map_err(UdsError::InvalidResponse)?;
        Ok(dtcs)
    }

    /// ClearDiagnosticInformation (0x14) for a 24-bit DTC group
    pub async fn clear_diagnostic_information(&self, group: u32) -> Result<(), UdsError> {
        let [_, high, mid, low] = group.to_be_bytes();
        self.positive(&[service_id::CLEAR_DIAGNOSTIC_INFO, high, mid, low])
            .await?;
        Ok(())
    }
}

fn classify(service_id: u8, raw: Vec<u8>) -> UdsResponse {
    let status = match raw.as_slice() {
        [] => ResponseStatus::Invalid("Empty response".to_string()),
        [service_id::NEGATIVE_RESPONSE, rest @ ..] => match rest {
            [sid, nrc, ..] if *sid == service_id => {
                ResponseStatus::Negative(NegativeResponseCode::from(*nrc))
            }
            [sid, _, ..] => ResponseStatus::Unexpected(format!(
                "Negative response names service 0x{:02X}",
                sid
            )),
            _ => ResponseStatus::Invalid("Negative response too short".to_string()),
        },
        [sid, ..] if *sid == service_id.wrapping_add(service_id::POSITIVE_RESPONSE_OFFSET) => {
            ResponseStatus::Positive
        }
        [sid, ..] => ResponseStatus::Unexpected(format!(
            "Response SID 0x{:02X} does not answer service 0x{:02X}",
            sid, service_id
        )),
    };
    UdsResponse {
        service_id,
        status,
        raw,
    }
}

fn expect_echo(what: &str, sent: u8, echoed: u8) -> Result<(), UdsError> {
    if sent == echoed {
        Ok(())
    } else {
        Err(UdsError::InvalidResponse(format!(
            "Response echoes {} 0x{:02X}, sent 0x{:02X}",
            what, echoed, sent
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockConfig;
    use crate::transport::MockTransportAdapter;
    use pretty_assertions::assert_eq;

    fn client_with(config: ClientConfig) -> (Arc<MockTransportAdapter>, UdsClient) {
        let mock = Arc::new(MockTransportAdapter::new(&MockConfig::default()));
        let client = UdsClient::new(mock.clone(), config).unwrap();
        (mock, client)
    }

    fn client() -> (Arc<MockTransportAdapter>, UdsClient) {
        client_with(ClientConfig::default())
    }

    #[tokio::test]
    async fn test_change_session_parses_timing() {
        let (_, client) = client();
        let timing = client.change_session(0x03).await.unwrap();
        assert_eq!(timing.session, 0x03);
        assert_eq!(timing.p2, Duration::from_millis(50));
        assert_eq!(timing.p2_star, Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_read_single_did() {
        let (mock, client) = client();
        let value = client.read_did(0x0003).await.unwrap();
        assert_eq!(value, DidValue::from([3]));
        assert_eq!(mock.sent_requests(), vec![vec![0x22, 0x00, 0x03]]);
    }

    #[tokio::test]
    async fn test_read_multiple_dids() {
        let (_, client) = client();
        let values = client
            .read_data_by_identifier(&[0x0003, 0x0004])
            .await
            .unwrap();
        assert_eq!(values[&0x0003], DidValue::from([3]));
        assert_eq!(values[&0x0004], DidValue::from([4]));
    }

    #[tokio::test]
    async fn test_zero_padding_tolerated() {
        let (mock, client) = client();
        mock.add_response(
            vec![0x22, 0x00, 0x02],
            vec![0x62, 0x00, 0x02, 0x02, 0x00, 0x00, 0x00, 0x00],
        );
        assert_eq!(client.read_did(0x0002).await.unwrap(), DidValue::from([2]));
    }

    #[tokio::test]
    async fn test_zero_padding_rejected_when_not_tolerated() {
        let config = ClientConfig {
            tolerate_zero_padding: false,
            ..ClientConfig::default()
        };
        let (mock, client) = client_with(config);
        // Two trailing zeros parse as a DID that was never requested
        mock.add_response(
            vec![0x22, 0x00, 0x02],
            vec![0x62, 0x00, 0x02, 0x02, 0x00, 0x00, 0x00],
        );
        assert!(matches!(
            client.read_did(0x0002).await,
            Err(UdsError::UnexpectedResponse(msg)) if msg.contains("0x0000")
        ));
        // A single trailing zero is a truncated DID
        mock.add_response(vec![0x22, 0x00, 0x01], vec![0x62, 0x00, 0x01, 0x01, 0x00]);
        assert!(matches!(
            client.read_did(0x0001).await,
            Err(UdsError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_did_zero_is_not_mistaken_for_padding() {
        let (_, client) = client();
        assert_eq!(client.read_did(0x0000).await.unwrap(), DidValue::from([0]));
    }

    #[tokio::test]
    async fn test_unrequested_did_is_unexpected() {
        let (mock, client) = client();
        mock.add_response(vec![0x22, 0x00, 0x01], vec![0x62, 0x00, 0x00, 0x05]);
        assert!(matches!(
            client.read_did(0x0001).await,
            Err(UdsError::UnexpectedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_did_rejected_before_sending() {
        let (mock, client) = client();
        assert!(matches!(
            client.read_did(0x1234).await,
            Err(UdsError::Config(_))
        ));
        assert!(mock.sent_requests().is_empty());
    }

    #[tokio::test]
    async fn test_negative_response_raises() {
        let (mock, client) = client();
        mock.add_response(vec![0x22, 0x00, 0x05], vec![0x7F, 0x22, 0x31]);
        assert_eq!(
            client.read_did(0x0005).await,
            Err(UdsError::NegativeResponse {
                service_id: 0x22,
                nrc: NegativeResponseCode::RequestOutOfRange,
            })
        );
    }

    #[tokio::test]
    async fn test_raw_request_without_exceptions_returns_status() {
        let config = ClientConfig {
            exception_on_negative_response: false,
            exception_on_unexpected_response: false,
            ..ClientConfig::default()
        };
        let (mock, client) = client_with(config);
        mock.add_response(vec![0x85], vec![0x7F, 0x85, 0x11]);
        mock.add_response(vec![0x27], vec![0x50, 0x01]);

        let negative = client.request(&[0x85, 0x01]).await.unwrap();
        assert_eq!(
            negative.status,
            ResponseStatus::Negative(NegativeResponseCode::ServiceNotSupported)
        );
        let unexpected = client.request(&[0x27, 0x01]).await.unwrap();
        assert!(matches!(unexpected.status, ResponseStatus::Unexpected(_)));
    }

    #[tokio::test]
    async fn test_invalid_response_raises() {
        let (mock, client) = client();
        mock.add_response(vec![0x11, 0x02], vec![0x7F]);
        assert!(matches!(
            client.ecu_reset(0x02).await,
            Err(UdsError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_ecu_reset() {
        let (_, client) = client();
        assert_eq!(client.ecu_reset(0x01).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_write_encodes_with_layout() {
        let (mock, client) = client();
        mock.add_response(vec![0x2E, 0x00, 0x03], vec![0x6E, 0x00, 0x03]);
        client.write_data_by_identifier(0x0003, &[-2]).await.unwrap();
        assert_eq!(
            mock.sent_requests(),
            vec![vec![0x2E, 0x00, 0x03, 0xFE, 0xFF]]
        );
    }

    #[tokio::test]
    async fn test_routine_control_result() {
        let (_, client) = client();
        let result = client.routine_control(0x01, 0xFF00, &[]).await.unwrap();
        assert_eq!(result.routine_id, 0xFF00);
        assert_eq!(result.info, Some(0));
        assert!(result.status_record.is_empty());
    }

    #[tokio::test]
    async fn test_request_download_encodes_location() {
        let (mock, client) = client();
        mock.add_response(vec![0x34], vec![0x74, 0x20, 0x0F, 0xFF]);
        let response = client
            .request_download(MemoryLocation::new(0x0800_0000, 0x100), 0x00)
            .await
            .unwrap();
        assert_eq!(response.max_block_length, 4095);
        assert_eq!(
            mock.sent_requests()[0],
            vec![0x34, 0x00, 0x44, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00]
        );
    }

    #[test]
    fn test_memory_location_lengths_checked() {
        assert!(MemoryLocation::with_lengths(0x1234, 0x10, 2, 1).is_ok());
        assert!(MemoryLocation::with_lengths(0x12345, 0x10, 2, 1).is_err());
        assert!(MemoryLocation::with_lengths(0, 0, 0, 1).is_err());
        let loc = MemoryLocation::with_lengths(0x1234, 0x10, 2, 1).unwrap();
        assert_eq!(loc.format_identifier(), 0x12);
    }

    #[tokio::test]
    async fn test_transfer_data_checks_counter_echo() {
        let (mock, client) = client();
        mock.add_response(vec![0x36, 0x01], vec![0x76, 0x01]);
        mock.add_response(vec![0x36, 0x02], vec![0x76, 0x05]);
        assert!(client.transfer_data(0x01, &[1, 2, 3]).await.unwrap().is_empty());
        assert!(matches!(
            client.transfer_data(0x02, &[4]).await,
            Err(UdsError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_tester_present_suppressed_only_sends() {
        let (mock, client) = client();
        client.tester_present(true).await.unwrap();
        client.tester_present(false).await.unwrap();
        assert_eq!(
            mock.sent_requests(),
            vec![vec![0x3E, 0x80], vec![0x3E, 0x00]]
        );
    }

    #[tokio::test]
    async fn test_read_dtcs() {
        let (_, client) = client();
        let dtcs = client.read_dtc_by_status_mask(0xFF).await.unwrap();
        assert_eq!(dtcs.len(), 2);
        assert!(dtcs[0].status.is_active());
    }

    #[tokio::test]
    async fn test_timeout_maps_to_uds_timeout() {
        let mock = Arc::new(MockTransportAdapter::new(&MockConfig { latency_ms: 500 }));
        let config = ClientConfig {
            request_timeout_ms: 20,
            ..ClientConfig::default()
        };
        let client = UdsClient::new(mock, config).unwrap();
        assert_eq!(client.tester_present(false).await, Err(UdsError::Timeout));
    }
}
