/// Ledger source (spec §6 External interfaces, Ledger source).
///
/// This is the crate's only boundary onto the RPC transport and the XDR
/// wire format, both treated as opaque external collaborators (spec §1):
/// `HttpLedgerSource` speaks Soroban RPC's `getLedgers`/`getLatestLedger`
/// JSON-RPC methods and immediately normalizes every response into this
/// module's own plain `Decoded*` types. Nothing downstream of this file
/// touches `stellar_xdr` directly.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::DecodedValue;
use stellar_xdr::curr as xdr;
use thiserror::Error;
use tracing::{error, warn};

use crate::config::SourceConfig;
use crate::retry::{Classify, ErrorClass};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("ledger not found: {0}")]
    NotFound(u32),
}

impl Classify for SourceError {
    fn classify(&self) -> ErrorClass {
        match self {
            SourceError::Transport(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    ErrorClass::Recoverable
                } else {
                    ErrorClass::Fatal
                }
            }
            SourceError::Rpc { code, .. } if *code == -32603 || *code == 429 => ErrorClass::Recoverable,
            SourceError::Rpc { .. } => ErrorClass::Fatal,
            SourceError::NotFound(_) => ErrorClass::Recoverable,
            SourceError::Decode(_) => ErrorClass::Fatal,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SourceHealth {
    pub latest_ledger: u32,
}

/// A durability class as carried on a Soroban ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Temporary,
    Persistent,
}

impl Durability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Durability::Temporary => "temporary",
            Durability::Persistent => "persistent",
        }
    }
}

/// One side (pre or post) of a raw ledger-entry change.
#[derive(Debug, Clone)]
pub struct RawEntryState {
    pub value_raw: String,
    pub value_decoded: DecodedValue,
}

/// A single raw contract-data entry change, before compaction (spec §4.4.4,
/// §4.5 extract-raw-changes).
#[derive(Debug, Clone)]
pub struct RawLedgerEntryChange {
    pub contract_id: String,
    pub key_raw: String,
    pub key_decoded: DecodedValue,
    pub durability: Durability,
    pub pre: Option<RawEntryState>,
    pub post: Option<RawEntryState>,
    /// Pre absent, post present, but the post entry carries a restore
    /// marker rather than being a fresh creation (spec §4.4.4).
    pub restored: bool,
}

/// A single emitted contract event, undecoded as to filtering (spec
/// §4.4.3, §4.5 extract-events).
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub contract_id: String,
    pub topics: Vec<DecodedValue>,
    pub data: DecodedValue,
}

/// The recognized Soroban transaction-meta scheme (Open Question (a)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaVersion {
    V3,
    V4,
}

/// Normalized Soroban-specific transaction metadata.
#[derive(Debug, Clone)]
pub struct SorobanMeta {
    pub version: MetaVersion,
    pub return_value: Option<DecodedValue>,
    pub events: Vec<RawEvent>,
    pub changes: Vec<RawLedgerEntryChange>,
}

/// One transaction within a decoded ledger (spec §3 Transaction).
#[derive(Debug, Clone)]
pub struct DecodedTransaction {
    pub hash: String,
    pub success: bool,
    pub is_soroban: bool,
    pub read_only_footprint: Vec<String>,
    pub read_write_footprint: Vec<String>,
    pub fee_charged: i64,
    /// Source account of the transaction, used as the invoker/deployer
    /// identity (spec §3 Deployed Contract "deployer", §4.4.2 "invoker").
    pub invoker: Option<String>,
    pub meta: Option<SorobanMeta>,
}

/// One closed ledger (spec §3 Ledger).
#[derive(Debug, Clone)]
pub struct DecodedLedger {
    pub sequence: u32,
    pub close_time: DateTime<Utc>,
    pub transactions: Vec<DecodedTransaction>,
}

#[async_trait]
pub trait LedgerSource: Send + Sync {
    async fn prepare_range(&self, from: u32) -> Result<(), SourceError>;
    async fn get_ledger(&self, seq: u32) -> Result<DecodedLedger, SourceError>;
    async fn health(&self) -> Result<SourceHealth, SourceError>;
    async fn close(&self);
}

/// Soroban RPC over pooled HTTP/JSON (spec §6 transport tuning knobs).
pub struct HttpLedgerSource {
    client: Client,
    rpc_url: String,
}

impl HttpLedgerSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        // reqwest exposes a single per-host idle-pool cap, not separate
        // global/per-host knobs; the tighter of the two configured limits
        // governs it so neither config item is silently ignored.
        let pool_max_idle_per_host = config.max_idle_conns.min(config.max_conns_per_host);

        let mut builder = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(pool_max_idle_per_host)
            .pool_idle_timeout(config.idle_conn_timeout)
            .tcp_keepalive(if config.keepalive { Some(Duration::from_secs(60)) } else { None });

        if !config.compression {
            builder = builder.no_gzip().no_brotli().no_deflate();
        }

        let client = builder.build()?;
        Ok(HttpLedgerSource { client, rpc_url: config.rpc_url.clone() })
    }

    async fn call<P: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, SourceError> {
        #[derive(Serialize)]
        struct Request<P> {
            jsonrpc: &'static str,
            id: u32,
            method: String,
            params: P,
        }

        #[derive(Deserialize)]
        struct RpcErrorBody {
            code: i64,
            message: String,
        }

        #[derive(Deserialize)]
        struct Response<R> {
            result: Option<R>,
            error: Option<RpcErrorBody>,
        }

        let body = Request { jsonrpc: "2.0", id: 1, method: method.to_string(), params };
        let response: Response<R> = self.client.post(&self.rpc_url).json(&body).send().await?.json().await?;

        if let Some(e) = response.error {
            return Err(SourceError::Rpc { code: e.code, message: e.message });
        }
        response.result.ok_or_else(|| SourceError::Decode("rpc response had neither result nor error".into()))
    }
}

#[async_trait]
impl LedgerSource for HttpLedgerSource {
    async fn prepare_range(&self, _from: u32) -> Result<(), SourceError> {
        // Soroban RPC has no session/range handshake; fetches are
        // independent per-sequence calls, so there is nothing to prepare.
        Ok(())
    }

    async fn get_ledger(&self, seq: u32) -> Result<DecodedLedger, SourceError> {
        #[derive(Serialize)]
        struct Params {
            #[serde(rename = "startLedger")]
            start_ledger: u32,
            pagination: Pagination,
        }

        #[derive(Serialize)]
        struct Pagination {
            limit: u32,
        }

        #[derive(Deserialize)]
        struct LedgerEntry {
            #[serde(rename = "ledgerCloseMetaXdr")]
            ledger_close_meta_xdr: String,
        }

        #[derive(Deserialize)]
        struct GetLedgersResult {
            ledgers: Vec<LedgerEntry>,
        }

        let result: GetLedgersResult = self
            .call("getLedgers", Params { start_ledger: seq, pagination: Pagination { limit: 1 } })
            .await?;

        let entry = result.ledgers.into_iter().next().ok_or(SourceError::NotFound(seq))?;
        decode_ledger_close_meta(&entry.ledger_close_meta_xdr)
    }

    async fn health(&self) -> Result<SourceHealth, SourceError> {
        #[derive(Deserialize)]
        struct LatestLedgerResult {
            sequence: u32,
        }

        let result: LatestLedgerResult = self.call("getLatestLedger", ()).await?;
        Ok(SourceHealth { latest_ledger: result.sequence })
    }

    async fn close(&self) {}
}

/// Decodes one base64 `LedgerCloseMeta` XDR blob into this crate's own
/// plain ledger representation. The only place `stellar_xdr` types appear.
fn decode_ledger_close_meta(raw_b64: &str) -> Result<DecodedLedger, SourceError> {
    use stellar_xdr::curr::{Limits, ReadXdr};

    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, raw_b64)
        .map_err(|e| SourceError::Decode(format!("invalid base64 ledger blob: {e}")))?;

    let meta = xdr::LedgerCloseMeta::from_xdr(bytes, Limits::none())
        .map_err(|e| SourceError::Decode(format!("invalid LedgerCloseMeta xdr: {e:?}")))?;

    match meta {
        xdr::LedgerCloseMeta::V1(v1) => {
            let sequence = v1.ledger_header.header.ledger_seq;
            let close_time = close_time_from_unix(v1.ledger_header.header.scp_value.close_time.0 as i64);
            let transactions = v1
                .tx_processing
                .iter()
                .zip(v1.tx_set.clone().into_v1_tx_set_iter())
                .enumerate()
                .map(|(idx, (processing, envelope))| decode_transaction(idx, processing, envelope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DecodedLedger { sequence, close_time, transactions })
        }
        xdr::LedgerCloseMeta::V2(v2) => {
            let sequence = v2.ledger_header.header.ledger_seq;
            let close_time = close_time_from_unix(v2.ledger_header.header.scp_value.close_time.0 as i64);
            let transactions = v2
                .tx_processing
                .iter()
                .zip(v2.tx_set.clone().into_v1_tx_set_iter())
                .enumerate()
                .map(|(idx, (processing, envelope))| decode_transaction(idx, processing, envelope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(DecodedLedger { sequence, close_time, transactions })
        }
        other => {
            error!(variant = ?other, "unrecognized LedgerCloseMeta version");
            Err(SourceError::Decode("unrecognized LedgerCloseMeta version".into()))
        }
    }
}

fn close_time_from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Bridges one transaction's processing result + envelope into a
/// `DecodedTransaction`, resolving the V3/V4 meta split named in spec §9
/// Open Question (a). Anything else is a ledger-level decode error.
fn decode_transaction(
    index: usize,
    processing: &xdr::TransactionResultMeta,
    envelope: xdr::TransactionEnvelope,
) -> Result<DecodedTransaction, SourceError> {
    let hash = hex::encode(processing.result.transaction_hash.0);
    let success = processing.result.result.result.is_success();
    let fee_charged = processing.result.result.fee_charged;

    let footprint = extract_footprint(&envelope);
    let is_soroban = footprint.is_some();

    let (read_only_footprint, read_write_footprint) = footprint.unwrap_or_default();
    let invoker = extract_invoker(&envelope);

    let meta = if is_soroban {
        match decode_soroban_meta(&processing.tx_apply_processing) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(tx_index = index, error = %e, "skipping transaction with undecodable soroban meta");
                return Err(e);
            }
        }
    } else {
        None
    };

    Ok(DecodedTransaction { hash, success, is_soroban, read_only_footprint, read_write_footprint, fee_charged, invoker, meta })
}

/// The transaction's source account, in canonical strkey form.
fn extract_invoker(envelope: &xdr::TransactionEnvelope) -> Option<String> {
    let tx = match envelope {
        xdr::TransactionEnvelope::Tx(e) => &e.tx,
        _ => return None,
    };
    match &tx.source_account {
        xdr::MuxedAccount::Ed25519(key) => Some(stellar_strkey::ed25519::PublicKey(key.0).to_string()),
        xdr::MuxedAccount::MuxedEd25519(m) => Some(stellar_strkey::ed25519::PublicKey(m.ed25519.0).to_string()),
    }
}

/// The read-only/read-write footprint of a Soroban transaction's sole
/// host-function invocation operation, if any (spec glossary "Footprint").
fn extract_footprint(envelope: &xdr::TransactionEnvelope) -> Option<(Vec<String>, Vec<String>)> {
    let tx = match envelope {
        xdr::TransactionEnvelope::Tx(e) => &e.tx,
        _ => return None,
    };

    let ext = match &tx.ext {
        xdr::TransactionExt::V1(ext) => ext,
        _ => return None,
    };

    let footprint = &ext.soroban_data.resources.footprint;
    let read_only = footprint.read_only.iter().filter_map(ledger_key_contract_id).collect();
    let read_write = footprint.read_write.iter().filter_map(ledger_key_contract_id).collect();
    Some((read_only, read_write))
}

fn ledger_key_contract_id(key: &xdr::LedgerKey) -> Option<String> {
    match key {
        xdr::LedgerKey::ContractData(d) => strkey_from_contract(&d.contract),
        _ => None,
    }
}

fn strkey_from_contract(address: &xdr::ScAddress) -> Option<String> {
    match address {
        xdr::ScAddress::Contract(hash) => {
            stellar_strkey::Contract(hash.0).to_string().into()
        }
        _ => None,
    }
}

/// Resolves V3 vs V4 Soroban meta (Open Question (a)); any other shape is
/// a loud ledger-level decode error, never a silent downgrade.
fn decode_soroban_meta(meta: &xdr::TransactionMeta) -> Result<SorobanMeta, SourceError> {
    match meta {
        xdr::TransactionMeta::V3(v3) => {
            let soroban = v3
                .soroban_meta
                .as_ref()
                .ok_or_else(|| SourceError::Decode("V3 meta missing soroban_meta".into()))?;
            let return_value = decode_scval(&soroban.return_value);
            let events = soroban.events.iter().filter_map(decode_event).collect();
            let changes = decode_changes(&v3.operations);
            Ok(SorobanMeta { version: MetaVersion::V3, return_value: Some(return_value), events, changes })
        }
        xdr::TransactionMeta::V4(v4) => {
            let soroban = v4
                .soroban_meta
                .as_ref()
                .ok_or_else(|| SourceError::Decode("V4 meta missing soroban_meta".into()))?;
            let return_value = decode_scval(&soroban.return_value);
            let events = soroban.events.iter().filter_map(decode_event).collect();
            let changes = decode_changes(&v4.operations);
            Ok(SorobanMeta { version: MetaVersion::V4, return_value: Some(return_value), events, changes })
        }
        other => Err(SourceError::Decode(format!("unrecognized transaction meta version: {other:?}"))),
    }
}

fn decode_event(event: &xdr::ContractEvent) -> Option<RawEvent> {
    let contract_id = event.contract_id.as_ref().and_then(|h| stellar_strkey::Contract(h.0).to_string().into())?;
    let body = match &event.body {
        xdr::ContractEventBody::V0(v0) => v0,
    };
    let topics = body.topics.iter().map(decode_scval).collect();
    let data = decode_scval(&body.data);
    Some(RawEvent { contract_id, topics, data })
}

fn decode_changes(operations: &[xdr::OperationMeta]) -> Vec<RawLedgerEntryChange> {
    operations.iter().flat_map(|op| decode_change_sequence(&op.changes.0)).collect()
}

/// `LedgerEntryChange::State` is not itself a change: it is the pre-image
/// the ledger emits immediately before the `Updated`/`Removed` entry that
/// actually describes what happened to that key (stellar-core's meta
/// convention). This walks the sequence carrying the most recent `State`
/// forward as the pending pre-image so `Updated`/`Removed` pair with the
/// right "before" value instead of being treated as bare creations (spec
/// §4.4.4 change-kind derivation depends on this pairing).
fn decode_change_sequence(changes: &[xdr::LedgerEntryChange]) -> Vec<RawLedgerEntryChange> {
    let mut result = Vec::new();
    let mut pending_pre: Option<(String, String, DecodedValue, Durability, RawEntryState)> = None;

    for change in changes {
        match change {
            xdr::LedgerEntryChange::State(entry) => {
                pending_pre = contract_data_from_entry(entry);
            }
            xdr::LedgerEntryChange::Created(entry) => {
                if let Some((contract_id, key_raw, key_decoded, durability, post)) =
                    contract_data_from_entry(entry)
                {
                    result.push(RawLedgerEntryChange {
                        contract_id,
                        key_raw,
                        key_decoded,
                        durability,
                        pre: None,
                        post: Some(post),
                        restored: false,
                    });
                }
                pending_pre = None;
            }
            xdr::LedgerEntryChange::Updated(entry) => {
                if let Some((contract_id, key_raw, key_decoded, durability, post)) =
                    contract_data_from_entry(entry)
                {
                    let pre = pending_pre.take().map(|(.., state)| state);
                    result.push(RawLedgerEntryChange {
                        contract_id,
                        key_raw,
                        key_decoded,
                        durability,
                        pre,
                        post: Some(post),
                        restored: false,
                    });
                } else {
                    pending_pre = None;
                }
            }
            xdr::LedgerEntryChange::Removed(key) => {
                if let Some((contract_id, key_raw, key_decoded, durability, pre_state)) = pending_pre.take() {
                    result.push(RawLedgerEntryChange {
                        contract_id,
                        key_raw,
                        key_decoded,
                        durability,
                        pre: Some(pre_state),
                        post: None,
                        restored: false,
                    });
                } else if let Some((contract_id, key_raw, key_decoded, durability)) = contract_data_key(key) {
                    // No preceding State entry was observed for this key (an
                    // ephemeral temporary entry expiring without a captured
                    // pre-image); record it without a previous value rather
                    // than dropping it.
                    result.push(RawLedgerEntryChange {
                        contract_id,
                        key_raw,
                        key_decoded,
                        durability,
                        pre: None,
                        post: None,
                        restored: false,
                    });
                }
            }
            xdr::LedgerEntryChange::Restored(entry) => {
                if let Some((contract_id, key_raw, key_decoded, durability, post)) =
                    contract_data_from_entry(entry)
                {
                    result.push(RawLedgerEntryChange {
                        contract_id,
                        key_raw,
                        key_decoded,
                        durability,
                        pre: None,
                        post: Some(post),
                        restored: true,
                    });
                }
                pending_pre = None;
            }
        }
    }

    result
}

/// Contract-data identity (no value) from a bare `LedgerKey`, used for a
/// `Removed` change that never got a preceding `State` pre-image.
fn contract_data_key(key: &xdr::LedgerKey) -> Option<(String, String, DecodedValue, Durability)> {
    let xdr::LedgerKey::ContractData(d) = key else { return None };
    let contract_id = strkey_from_contract(&d.contract)?;
    let key_decoded = decode_scval(&d.key);
    let key_raw = hex::encode(d.key.to_xdr(stellar_xdr::curr::Limits::none()).unwrap_or_default());
    let durability = match d.durability {
        xdr::ContractDataDurability::Temporary => Durability::Temporary,
        xdr::ContractDataDurability::Persistent => Durability::Persistent,
    };
    Some((contract_id, key_raw, key_decoded, durability))
}

fn contract_data_from_entry(
    entry: &xdr::LedgerEntry,
) -> Option<(String, String, DecodedValue, Durability, RawEntryState)> {
    let data = match &entry.data {
        xdr::LedgerEntryData::ContractData(d) => d,
        _ => return None,
    };
    let contract_id = strkey_from_contract(&data.contract)?;
    let key_decoded = decode_scval(&data.key);
    let key_raw = hex::encode(
        data.key
            .to_xdr(stellar_xdr::curr::Limits::none())
            .unwrap_or_default(),
    );
    let durability = match data.durability {
        xdr::ContractDataDurability::Temporary => Durability::Temporary,
        xdr::ContractDataDurability::Persistent => Durability::Persistent,
    };
    let value_decoded = decode_scval(&data.val);
    let value_raw = hex::encode(
        data.val
            .to_xdr(stellar_xdr::curr::Limits::none())
            .unwrap_or_default(),
    );
    Some((contract_id, key_raw, key_decoded, durability, RawEntryState { value_raw, value_decoded }))
}

/// Recursive total decode of an `ScVal` into the generic value tree (spec
/// §4.5, §9 "polymorphic decoded values"). Never fails; unrecognized
/// variants become `Unknown(type_name)`.
fn decode_scval(val: &xdr::ScVal) -> DecodedValue {
    match val {
        xdr::ScVal::Void => DecodedValue::Void,
        xdr::ScVal::Bool(b) => DecodedValue::Bool(*b),
        xdr::ScVal::U32(v) => DecodedValue::int_u32(*v),
        xdr::ScVal::I32(v) => DecodedValue::int_i32(*v),
        xdr::ScVal::U64(v) => DecodedValue::int_u64(*v),
        xdr::ScVal::I64(v) => DecodedValue::int_i64(*v),
        xdr::ScVal::U128(v) => DecodedValue::int_u128(((v.hi as u128) << 64) | v.lo as u128),
        xdr::ScVal::I128(v) => DecodedValue::int_i128((((v.hi as i128) << 64) | v.lo as i128)),
        xdr::ScVal::U256(v) => DecodedValue::int_u256_parts([
            ((v.hi_hi as u64) << 0),
            v.hi_lo,
            v.lo_hi,
            v.lo_lo,
        ]),
        xdr::ScVal::I256(v) => DecodedValue::int_i256_parts([
            v.hi_hi as u64,
            v.hi_lo,
            v.lo_hi,
            v.lo_lo,
        ]),
        xdr::ScVal::Symbol(s) => DecodedValue::Symbol(s.to_string()),
        xdr::ScVal::String(s) => DecodedValue::String(s.to_string()),
        xdr::ScVal::Bytes(b) => DecodedValue::Bytes(hex::encode(b.as_slice())),
        xdr::ScVal::Address(addr) => DecodedValue::Address(address_to_strkey(addr)),
        xdr::ScVal::Vec(Some(items)) => DecodedValue::Vec(items.0.iter().map(decode_scval).collect()),
        xdr::ScVal::Vec(None) => DecodedValue::Vec(Vec::new()),
        xdr::ScVal::Map(Some(entries)) => DecodedValue::Map(
            entries.0.iter().map(|e| (decode_scval(&e.key), decode_scval(&e.val))).collect(),
        ),
        xdr::ScVal::Map(None) => DecodedValue::Map(Vec::new()),
        other => DecodedValue::Unknown(format!("{other:?}")),
    }
}

fn address_to_strkey(addr: &xdr::ScAddress) -> String {
    match addr {
        xdr::ScAddress::Account(xdr::AccountId(xdr::PublicKey::PublicKeyTypeEd25519(key))) => {
            stellar_strkey::ed25519::PublicKey(key.0).to_string()
        }
        xdr::ScAddress::Contract(hash) => stellar_strkey::Contract(hash.0).to_string(),
        _ => "unknown".to_string(),
    }
}

/// Any `ScVal::Vec` whose first element is the address and (optionally) a
/// second element carries init params — the sum-typed factory-return
/// shape named in spec §4.4.1.
pub fn split_factory_return(value: &DecodedValue) -> (Option<&DecodedValue>, Option<&DecodedValue>) {
    match value {
        DecodedValue::Address(_) => (Some(value), None),
        DecodedValue::Vec(items) if !items.is_empty() => {
            (items.first(), items.get(1))
        }
        _ => (None, None),
    }
}
