use crate::chain::domain::{
    BlockAttestation, BuilderHeader, Capability, CapabilitySet, ChainClient, ChainValidator,
    CommitteeData, ObservedBlock, ProposerDutyData, ValidatorStatus,
};
use crate::infrastructure::config::BeaconConfig;
use crate::shared::error::WatcherError;
use crate::shared::types::{epoch_of, Epoch, Pubkey, Slot, ValidatorIndex, H160, H256};
use crate::shared::utils::quoted;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Beacon node client speaking the standard beacon API.
pub struct BeaconClient {
    url: String,
    http_client: Client,
    relay_urls: Vec<String>,
    capabilities: CapabilitySet,
}

#[derive(Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct VersionData {
    version: String,
}

#[derive(Deserialize)]
struct HeaderData {
    header: SignedHeader,
}

#[derive(Deserialize)]
struct SignedHeader {
    message: HeaderMessage,
}

#[derive(Deserialize)]
struct HeaderMessage {
    #[serde(deserialize_with = "quoted::u64")]
    slot: u64,
}

#[derive(Deserialize)]
struct FinalityData {
    finalized: Checkpoint,
}

#[derive(Deserialize)]
struct Checkpoint {
    #[serde(deserialize_with = "quoted::u64")]
    epoch: u64,
}

#[derive(Deserialize)]
struct ProposerDutyItem {
    pubkey: String,
    #[serde(deserialize_with = "quoted::u64")]
    validator_index: u64,
    #[serde(deserialize_with = "quoted::u64")]
    slot: u64,
}

#[derive(Deserialize)]
struct CommitteeItem {
    #[serde(deserialize_with = "quoted::u64")]
    index: u64,
    #[serde(deserialize_with = "quoted::u64")]
    slot: u64,
    #[serde(deserialize_with = "quoted::vec_u64")]
    validators: Vec<u64>,
}

#[derive(Deserialize)]
struct SignedBlock {
    message: BlockMessage,
}

#[derive(Deserialize)]
struct BlockMessage {
    #[serde(deserialize_with = "quoted::u64")]
    slot: u64,
    #[serde(deserialize_with = "quoted::u64")]
    proposer_index: u64,
    parent_root: String,
    body: BlockBody,
}

#[derive(Deserialize)]
struct BlockBody {
    #[serde(default)]
    attestations: Vec<AttestationItem>,
    execution_payload: Option<ExecutionPayload>,
}

#[derive(Deserialize)]
struct AttestationItem {
    aggregation_bits: String,
    data: AttestationData,
    committee_bits: Option<String>,
}

#[derive(Deserialize)]
struct AttestationData {
    #[serde(deserialize_with = "quoted::u64")]
    slot: u64,
    #[serde(deserialize_with = "quoted::u64")]
    index: u64,
}

#[derive(Deserialize)]
struct ExecutionPayload {
    fee_recipient: String,
    #[serde(deserialize_with = "quoted::u64")]
    block_number: u64,
}

#[derive(Deserialize)]
struct ValidatorItem {
    #[serde(deserialize_with = "quoted::u64")]
    index: u64,
    status: ValidatorStatus,
    validator: ValidatorRecord,
}

#[derive(Deserialize)]
struct ValidatorRecord {
    pubkey: String,
    slashed: bool,
}

#[derive(Deserialize)]
struct LivenessItem {
    #[serde(deserialize_with = "quoted::u64")]
    index: u64,
    is_live: bool,
}

#[derive(Deserialize)]
struct BidTrace {
    builder_pubkey: String,
}

impl BeaconClient {
    pub fn new(config: &BeaconConfig, relay_urls: Vec<String>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            http_client,
            relay_urls,
            capabilities: CapabilitySet::default(),
        })
    }

    /// Probes which optional data sources the node offers. Fails when the
    /// node cannot report its head.
    pub async fn negotiate(&self) -> Result<CapabilitySet> {
        match self.get::<DataResponse<VersionData>>("/eth/v1/node/version").await {
            Ok(Some(version)) => info!("Connected to beacon node {}", version.data.version),
            Ok(None) => warn!("Beacon node did not report a version"),
            Err(e) => warn!("Failed to query beacon node version: {}", e),
        }

        let mut capabilities = CapabilitySet::new([Capability::AttestationInclusion]);

        let head_epoch = epoch_of(self.head_slot().await?);
        let probe_epoch = head_epoch.saturating_sub(1);
        match self.post_liveness(probe_epoch, &[]).await {
            Ok(_) => {
                capabilities.insert(Capability::ValidatorLiveness);
            }
            Err(e) => warn!(
                "Beacon node does not serve validator liveness, missed attestations will be reported as unknown: {}",
                e
            ),
        }

        if !self.relay_urls.is_empty() {
            capabilities.insert(Capability::BuilderHeaders);
        }

        info!("Negotiated beacon capabilities: {:?}", capabilities.iter().collect::<Vec<_>>());
        Ok(capabilities)
    }

    pub fn set_capabilities(&mut self, capabilities: CapabilitySet) {
        self.capabilities = capabilities;
    }

    /// GET returning `None` on 404.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = self
            .http_client
            .get(format!("{}{}", self.url, path))
            .send()
            .await
            .map_err(WatcherError::from)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(WatcherError::Beacon(format!(
                "GET {} failed with status: {}",
                path,
                response.status()
            ))
            .into());
        }

        Ok(Some(response.json::<T>().await.map_err(WatcherError::from)?))
    }

    async fn get_required<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get(path)
            .await?
            .ok_or_else(|| WatcherError::Beacon(format!("GET {} returned 404", path)).into())
    }

    async fn post<B: serde::Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .http_client
            .post(format!("{}{}", self.url, path))
            .json(body)
            .send()
            .await
            .map_err(WatcherError::from)?;

        if !response.status().is_success() {
            return Err(WatcherError::Beacon(format!(
                "POST {} failed with status: {}",
                path,
                response.status()
            ))
            .into());
        }

        Ok(response.json::<T>().await.map_err(WatcherError::from)?)
    }

    async fn post_liveness(&self, epoch: Epoch, indexes: &[ValidatorIndex]) -> Result<Vec<LivenessItem>> {
        let body: Vec<String> = indexes.iter().map(|i| i.to_string()).collect();
        let response: DataResponse<Vec<LivenessItem>> = self
            .post(&format!("/eth/v1/validator/liveness/{}", epoch), &body)
            .await?;
        Ok(response.data)
    }

    async fn relay_delivery(&self, relay_url: &str, slot: Slot) -> Result<Option<BuilderHeader>> {
        let url = format!(
            "{}/relay/v1/data/bidtraces/proposer_payload_delivered?slot={}",
            relay_url.trim_end_matches('/'),
            slot
        );

        let response = self.http_client.get(&url).send().await.map_err(WatcherError::from)?;
        if !response.status().is_success() {
            return Err(WatcherError::Beacon(format!(
                "Relay {} answered with status: {}",
                relay_url,
                response.status()
            ))
            .into());
        }

        let traces: Vec<BidTrace> = response.json().await.map_err(WatcherError::from)?;
        Ok(traces.into_iter().next().map(|trace| BuilderHeader {
            relay: relay_url.to_string(),
            builder_pubkey: trace.builder_pubkey,
        }))
    }
}

fn parse_block(signed: SignedBlock) -> Result<ObservedBlock> {
    let message = signed.message;
    let parent_root: H256 = message.parent_root.parse()?;

    let (fee_recipient, execution_block_number) = match message.body.execution_payload {
        Some(payload) => (Some(payload.fee_recipient.parse::<H160>()?), Some(payload.block_number)),
        None => (None, None),
    };

    let attestations = message
        .body
        .attestations
        .into_iter()
        .map(|attestation| BlockAttestation {
            slot: attestation.data.slot,
            committee_index: attestation.data.index,
            aggregation_bits: attestation.aggregation_bits,
            committee_bits: attestation.committee_bits,
        })
        .collect();

    Ok(ObservedBlock {
        slot: message.slot,
        proposer_index: message.proposer_index,
        parent_root,
        fee_recipient,
        execution_block_number,
        attestations,
    })
}

fn parse_validators(items: Vec<ValidatorItem>) -> Vec<ChainValidator> {
    items
        .into_iter()
        .filter_map(|item| match item.validator.pubkey.parse::<Pubkey>() {
            Ok(pubkey) => Some(ChainValidator {
                index: item.index,
                pubkey,
                status: item.status,
                slashed: item.validator.slashed,
            }),
            Err(e) => {
                warn!("Skipping validator {} with malformed pubkey: {}", item.index, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl ChainClient for BeaconClient {
    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    async fn head_slot(&self) -> Result<Slot> {
        let response: DataResponse<HeaderData> = self.get_required("/eth/v1/beacon/headers/head").await?;
        Ok(response.data.header.message.slot)
    }

    async fn finalized_epoch(&self) -> Result<Epoch> {
        let response: DataResponse<FinalityData> = self
            .get_required("/eth/v1/beacon/states/head/finality_checkpoints")
            .await?;
        Ok(response.data.finalized.epoch)
    }

    async fn proposer_duties(&self, epoch: Epoch) -> Result<Vec<ProposerDutyData>> {
        let response: DataResponse<Vec<ProposerDutyItem>> = self
            .get_required(&format!("/eth/v1/validator/duties/proposer/{}", epoch))
            .await?;

        response
            .data
            .into_iter()
            .map(|item| -> Result<ProposerDutyData> {
                Ok(ProposerDutyData {
                    slot: item.slot,
                    validator_index: item.validator_index,
                    pubkey: item.pubkey.parse()?,
                })
            })
            .collect()
    }

    async fn committees(&self, epoch: Epoch) -> Result<Vec<CommitteeData>> {
        let response: DataResponse<Vec<CommitteeItem>> = self
            .get_required(&format!("/eth/v1/beacon/states/head/committees?epoch={}", epoch))
            .await?;

        Ok(response
            .data
            .into_iter()
            .map(|item| CommitteeData {
                slot: item.slot,
                index: item.index,
                validators: item.validators,
            })
            .collect())
    }

    async fn block(&self, slot: Slot) -> Result<Option<ObservedBlock>> {
        let response: Option<DataResponse<SignedBlock>> =
            self.get(&format!("/eth/v2/beacon/blocks/{}", slot)).await?;

        match response {
            Some(response) => Ok(Some(parse_block(response.data)?)),
            None => {
                debug!("No canonical block at slot {}", slot);
                Ok(None)
            }
        }
    }

    async fn validators(&self, pubkeys: &[Pubkey]) -> Result<Vec<ChainValidator>> {
        let path = "/eth/v1/beacon/states/head/validators";
        let response: DataResponse<Vec<ValidatorItem>> = if pubkeys.is_empty() {
            self.get_required(path).await?
        } else {
            let ids: Vec<&str> = pubkeys.iter().map(|p| p.as_str()).collect();
            self.post(path, &serde_json::json!({ "ids": ids })).await?
        };

        Ok(parse_validators(response.data))
    }

    async fn liveness(&self, epoch: Epoch, indexes: &[ValidatorIndex]) -> Result<HashMap<ValidatorIndex, bool>> {
        if !self.capabilities.supports(Capability::ValidatorLiveness) {
            return Err(WatcherError::MissingData("validator liveness not supported".to_string()).into());
        }

        Ok(self
            .post_liveness(epoch, indexes)
            .await?
            .into_iter()
            .map(|item| (item.index, item.is_live))
            .collect())
    }

    async fn builder_header(&self, slot: Slot) -> Result<Option<BuilderHeader>> {
        let mut last_error = None;

        for relay_url in &self.relay_urls {
            match self.relay_delivery(relay_url, slot).await {
                Ok(Some(header)) => return Ok(Some(header)),
                Ok(None) => {}
                Err(e) => {
                    warn!("Relay {} lookup for slot {} failed: {}", relay_url, slot, e);
                    last_error = Some(e);
                }
            }
        }

        // An unanswered relay may have been the one that delivered.
        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_JSON: &str = r#"{
        "version": "deneb",
        "data": {
            "message": {
                "slot": "4839775",
                "proposer_index": "365100",
                "parent_root": "0x1111111111111111111111111111111111111111111111111111111111111111",
                "body": {
                    "attestations": [
                        {
                            "aggregation_bits": "0x0d",
                            "data": { "slot": "4839774", "index": "3" }
                        }
                    ],
                    "execution_payload": {
                        "fee_recipient": "0x742d35cc6634c0532925a3b8d4c9db96c4b4d8b6",
                        "block_number": "17000000"
                    }
                }
            }
        }
    }"#;

    #[test]
    fn test_parse_block() {
        let response: DataResponse<SignedBlock> = serde_json::from_str(BLOCK_JSON).unwrap();
        let block = parse_block(response.data).unwrap();

        assert_eq!(block.slot, 4839775);
        assert_eq!(block.proposer_index, 365100);
        assert_eq!(block.execution_block_number, Some(17000000));
        assert_eq!(
            block.fee_recipient.unwrap().to_string(),
            "0x742d35cc6634c0532925a3b8d4c9db96c4b4d8b6"
        );
        assert_eq!(block.attestations.len(), 1);
        assert_eq!(block.attestations[0].committee_index, 3);
        assert!(block.attestations[0].committee_bits.is_none());
    }

    #[test]
    fn test_parse_validators_skips_malformed_keys() {
        let json = format!(
            r#"[
                {{"index": "1", "balance": "32000000000", "status": "active_ongoing",
                  "validator": {{"pubkey": "0x{}", "slashed": false}}}},
                {{"index": "2", "balance": "32000000000", "status": "exited_slashed",
                  "validator": {{"pubkey": "0x1234", "slashed": true}}}}
            ]"#,
            "aa".repeat(48)
        );
        let items: Vec<ValidatorItem> = serde_json::from_str(&json).unwrap();
        let validators = parse_validators(items);

        assert_eq!(validators.len(), 1);
        assert_eq!(validators[0].index, 1);
        assert_eq!(validators[0].status, ValidatorStatus::ActiveOngoing);
    }

    #[test]
    fn test_client_creation_strips_trailing_slash() {
        let config = BeaconConfig {
            url: "http://beacon-node:5052/".to_string(),
            ..Default::default()
        };
        let client = BeaconClient::new(&config, Vec::new()).unwrap();
        assert_eq!(client.url, "http://beacon-node:5052");
        assert!(!client.capabilities().supports(Capability::ValidatorLiveness));
    }
}
