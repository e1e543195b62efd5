//! On-chain CTF redeem path.
//!
//! `mergePositions` burns one share of each outcome of a condition and
//! returns one unit of collateral. Two wallet classes are supported:
//!
//! - **EOA** — the key signs and sends the CTF call directly.
//! - **Proxy** — a 1-of-1 proxy contract owned by the key; the inner CTF
//!   call is forwarded through the proxy's exec entrypoint with
//!   `safe_tx_gas = 0`, so an inner revert reverts the whole outer
//!   transaction and the nonce is preserved.
//!
//! Multi-signature proxies are out of scope and rejected at construction.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{keccak256, Address, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::MarketError;
use crate::types::MergeReceipt;

/// Which wallet class signs the merge transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletKind {
    /// Externally-owned account, signs directly.
    Eoa,
    /// 1-of-1 proxy contract; the EOA signs and forwards.
    Proxy,
}

impl WalletKind {
    /// Map the exchange's signature-type code (0 = EOA, 1 = proxy).
    pub fn from_signature_type(code: u8) -> Option<Self> {
        match code {
            0 => Some(WalletKind::Eoa),
            1 => Some(WalletKind::Proxy),
            _ => None,
        }
    }
}

/// Chain configuration for the merger.
#[derive(Debug, Clone)]
pub struct CtfConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Conditional tokens contract.
    pub ctf_address: String,
    /// Collateral (USDC) contract.
    pub collateral_address: String,
    /// Proxy contract address; required for `WalletKind::Proxy`.
    pub proxy_address: Option<String>,
    /// POL/USD conversion for gas cost accounting.
    pub pol_usd_price: Decimal,
    pub request_timeout: Duration,
}

impl Default for CtfConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://polygon-rpc.com".to_string(),
            chain_id: 137,
            ctf_address: "0x4D97DCd97eC945f40cF65F87097ACe5EA0476045".to_string(),
            collateral_address: "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174".to_string(),
            proxy_address: None,
            pol_usd_price: dec!(0.40),
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// Signs and submits merge transactions.
pub struct CtfMerger {
    config: CtfConfig,
    wallet: WalletKind,
    signer: PrivateKeySigner,
    http: reqwest::Client,
    ctf: Address,
    collateral: Address,
    proxy: Option<Address>,
}

impl CtfMerger {
    pub fn new(
        config: CtfConfig,
        wallet: WalletKind,
        private_key: &str,
    ) -> Result<Self, MarketError> {
        let signer = private_key
            .strip_prefix("0x")
            .unwrap_or(private_key)
            .parse::<PrivateKeySigner>()
            .map_err(|_| MarketError::Permanent("invalid merge wallet key".into()))?;

        let ctf = parse_address(&config.ctf_address)?;
        let collateral = parse_address(&config.collateral_address)?;
        let proxy = match (&wallet, &config.proxy_address) {
            (WalletKind::Proxy, Some(addr)) => Some(parse_address(addr)?),
            (WalletKind::Proxy, None) => {
                return Err(MarketError::Permanent(
                    "proxy wallet selected but no proxy address configured".into(),
                ));
            }
            (WalletKind::Eoa, _) => None,
        };

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MarketError::Permanent(e.to_string()))?;

        Ok(Self {
            config,
            wallet,
            signer,
            http,
            ctf,
            collateral,
            proxy,
        })
    }

    pub fn wallet_kind(&self) -> WalletKind {
        self.wallet
    }

    /// Redeem `shares` matched pairs of the condition back to collateral.
    pub async fn merge(
        &self,
        condition_id: &str,
        shares: Decimal,
    ) -> Result<MergeReceipt, MarketError> {
        let (to, data) = self.build_call(condition_id, shares)?;
        let from = self.signer.address();

        let nonce = self.rpc_u256("eth_getTransactionCount", json!([fmt_addr(from), "pending"])).await?;
        let gas_price = self.rpc_u256("eth_gasPrice", json!([])).await?;
        let gas = self
            .rpc_u256(
                "eth_estimateGas",
                json!([{ "from": fmt_addr(from), "to": fmt_addr(to), "data": fmt_bytes(&data) }]),
            )
            .await?;

        let raw = self
            .sign_legacy_tx(nonce, gas_price, gas, to, &data)
            .await?;
        let tx_hash = self
            .rpc_string("eth_sendRawTransaction", json!([fmt_bytes(&raw)]))
            .await?;

        let gas_cost_usd = wei_to_usd(gas * gas_price, self.config.pol_usd_price);
        info!(
            condition_id,
            %shares,
            tx_hash = %tx_hash,
            %gas_cost_usd,
            wallet = ?self.wallet,
            "Merge transaction submitted"
        );
        Ok(MergeReceipt { tx_hash, gas_cost_usd })
    }

    /// Estimated USD gas cost of the merge, from a live estimate.
    pub async fn estimate_gas_usd(
        &self,
        condition_id: &str,
        shares: Decimal,
    ) -> Result<Decimal, MarketError> {
        let (to, data) = self.build_call(condition_id, shares)?;
        let from = self.signer.address();
        let gas = self
            .rpc_u256(
                "eth_estimateGas",
                json!([{ "from": fmt_addr(from), "to": fmt_addr(to), "data": fmt_bytes(&data) }]),
            )
            .await?;
        let gas_price = self.rpc_u256("eth_gasPrice", json!([])).await?;
        Ok(wei_to_usd(gas * gas_price, self.config.pol_usd_price))
    }

    /// USDC balance of the funding wallet (proxy if configured, else EOA).
    pub async fn usdc_balance(&self) -> Result<Decimal, MarketError> {
        let owner = self.proxy.unwrap_or_else(|| self.signer.address());
        let mut data = selector("balanceOf(address)").to_vec();
        data.extend_from_slice(&enc_address(owner));
        let result = self
            .rpc_string(
                "eth_call",
                json!([{ "to": fmt_addr(self.collateral), "data": fmt_bytes(&data) }, "latest"]),
            )
            .await?;
        let micro = parse_hex_u256(&result)?;
        let micro_u128: u128 = micro
            .try_into()
            .map_err(|_| MarketError::Permanent("balance overflows u128".into()))?;
        let balance = Decimal::from_u128(micro_u128)
            .ok_or_else(|| MarketError::Permanent("balance overflows Decimal".into()))?;
        Ok(balance / dec!(1000000))
    }

    /// Target address + calldata for the merge, routed per wallet class.
    fn build_call(&self, condition_id: &str, shares: Decimal) -> Result<(Address, Vec<u8>), MarketError> {
        if shares <= Decimal::ZERO {
            return Err(MarketError::Permanent("non-positive merge amount".into()));
        }
        let condition = parse_b256(condition_id)?;
        // Collateral has 6 decimals.
        let amount_u128 = (shares * dec!(1000000))
            .trunc()
            .to_u128()
            .ok_or_else(|| MarketError::Permanent(format!("merge amount out of range: {}", shares)))?;
        let inner = encode_merge_positions(self.collateral, condition, U256::from(amount_u128));

        match self.wallet {
            WalletKind::Eoa => Ok((self.ctf, inner)),
            WalletKind::Proxy => {
                // Safe invariant: proxy presence was checked at construction.
                let proxy = self
                    .proxy
                    .ok_or_else(|| MarketError::Permanent("proxy address missing".into()))?;
                let outer = encode_proxy_exec(self.ctf, &inner, self.signer.address());
                Ok((proxy, outer))
            }
        }
    }

    /// Sign an EIP-155 legacy transaction and return the raw RLP bytes.
    async fn sign_legacy_tx(
        &self,
        nonce: U256,
        gas_price: U256,
        gas: U256,
        to: Address,
        data: &[u8],
    ) -> Result<Vec<u8>, MarketError> {
        let chain_id = U256::from(self.config.chain_id);

        let unsigned = rlp_list(&[
            rlp_uint(nonce),
            rlp_uint(gas_price),
            rlp_uint(gas),
            rlp_item(to.as_slice()),
            rlp_uint(U256::ZERO),
            rlp_item(data),
            rlp_uint(chain_id),
            rlp_uint(U256::ZERO),
            rlp_uint(U256::ZERO),
        ]);
        let digest = keccak256(&unsigned);

        let sig = self
            .signer
            .sign_hash(&digest)
            .await
            .map_err(|e| MarketError::Permanent(format!("tx signing failed: {e}")))?;
        let bytes = sig.as_bytes();
        // Last byte is a raw recovery id (0/1) or Ethereum-style v (27/28).
        let parity = u64::from(if bytes[64] >= 27 { bytes[64] - 27 } else { bytes[64] } & 1);
        let v = U256::from(35 + 2 * self.config.chain_id + parity);

        let signed = rlp_list(&[
            rlp_uint(nonce),
            rlp_uint(gas_price),
            rlp_uint(gas),
            rlp_item(to.as_slice()),
            rlp_uint(U256::ZERO),
            rlp_item(data),
            rlp_uint(v),
            rlp_item(trim_leading_zeros(&bytes[0..32])),
            rlp_item(trim_leading_zeros(&bytes[32..64])),
        ]);
        debug!(tx_len = signed.len(), "Legacy transaction signed");
        Ok(signed)
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, MarketError> {
        let resp = self
            .http
            .post(&self.config.rpc_url)
            .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params }))
            .send()
            .await
            .map_err(MarketError::from_http)?
            .error_for_status()
            .map_err(MarketError::from_http)?;
        let body: Value = resp.json().await.map_err(MarketError::from_http)?;
        if let Some(err) = body.get("error") {
            // Node-side execution errors are permanent; transport issues were
            // already classified above.
            return Err(MarketError::Permanent(format!("{} failed: {}", method, err)));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| MarketError::Transient(format!("{}: empty RPC response", method)))
    }

    async fn rpc_string(&self, method: &str, params: Value) -> Result<String, MarketError> {
        let v = self.rpc(method, params).await?;
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| MarketError::Transient(format!("{}: non-string result", method)))
    }

    async fn rpc_u256(&self, method: &str, params: Value) -> Result<U256, MarketError> {
        let s = self.rpc_string(method, params).await?;
        parse_hex_u256(&s)
    }
}

// --- ABI encoding (hand-rolled for the two calls we make) ---

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn enc_address(addr: Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr.as_slice());
    out
}

fn enc_u256(v: U256) -> [u8; 32] {
    v.to_be_bytes::<32>()
}

/// `mergePositions(address,bytes32,bytes32,uint256[],uint256)` with the
/// binary partition `[1, 2]` and a zero parent collection.
fn encode_merge_positions(collateral: Address, condition_id: [u8; 32], amount: U256) -> Vec<u8> {
    let mut data = selector("mergePositions(address,bytes32,bytes32,uint256[],uint256)").to_vec();
    data.extend_from_slice(&enc_address(collateral));
    data.extend_from_slice(&[0u8; 32]); // parentCollectionId
    data.extend_from_slice(&condition_id);
    data.extend_from_slice(&enc_u256(U256::from(5 * 32u64))); // offset to partition
    data.extend_from_slice(&enc_u256(amount));
    // partition tail: len 2, index sets 0b01 and 0b10
    data.extend_from_slice(&enc_u256(U256::from(2u64)));
    data.extend_from_slice(&enc_u256(U256::from(1u64)));
    data.extend_from_slice(&enc_u256(U256::from(2u64)));
    data
}

/// Proxy `execTransaction` wrapper with `safeTxGas = 0` and a
/// pre-validated owner signature (`v = 1`, `r = owner`).
fn encode_proxy_exec(to: Address, inner: &[u8], owner: Address) -> Vec<u8> {
    let sig_tail = {
        // 65-byte pre-validated signature: r = owner, s = 0, v = 1.
        let mut sig = Vec::with_capacity(65);
        sig.extend_from_slice(&enc_address(owner));
        sig.extend_from_slice(&[0u8; 32]);
        sig.push(1);
        sig
    };

    let data_offset = 10 * 32u64;
    let data_padded = pad32(inner);
    let sig_offset = data_offset + 32 + data_padded.len() as u64;

    let mut out = selector(
        "execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)",
    )
    .to_vec();
    out.extend_from_slice(&enc_address(to));
    out.extend_from_slice(&[0u8; 32]); // value
    out.extend_from_slice(&enc_u256(U256::from(data_offset)));
    out.extend_from_slice(&[0u8; 32]); // operation = CALL
    out.extend_from_slice(&[0u8; 32]); // safeTxGas = 0 (revert bubbles up)
    out.extend_from_slice(&[0u8; 32]); // baseGas
    out.extend_from_slice(&[0u8; 32]); // gasPrice
    out.extend_from_slice(&[0u8; 32]); // gasToken
    out.extend_from_slice(&[0u8; 32]); // refundReceiver
    out.extend_from_slice(&enc_u256(U256::from(sig_offset)));
    out.extend_from_slice(&enc_u256(U256::from(inner.len() as u64)));
    out.extend_from_slice(&data_padded);
    out.extend_from_slice(&enc_u256(U256::from(sig_tail.len() as u64)));
    out.extend_from_slice(&pad32(&sig_tail));
    out
}

fn pad32(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let rem = out.len() % 32;
    if rem != 0 {
        out.resize(out.len() + (32 - rem), 0);
    }
    out
}

// --- Minimal RLP (legacy transaction encoding only) ---

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn rlp_item(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 4);
    if data.len() == 1 && data[0] < 0x80 {
        out.push(data[0]);
    } else if data.len() <= 55 {
        out.push(0x80 + data.len() as u8);
        out.extend_from_slice(data);
    } else {
        let len_be = trim_leading_zeros(&(data.len() as u64).to_be_bytes()).to_vec();
        out.push(0xb7 + len_be.len() as u8);
        out.extend_from_slice(&len_be);
        out.extend_from_slice(data);
    }
    out
}

fn rlp_uint(v: U256) -> Vec<u8> {
    let bytes = v.to_be_bytes::<32>();
    rlp_item(trim_leading_zeros(&bytes))
}

fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = items.iter().flatten().copied().collect();
    let mut out = Vec::with_capacity(payload.len() + 4);
    if payload.len() <= 55 {
        out.push(0xc0 + payload.len() as u8);
    } else {
        let len_be = trim_leading_zeros(&(payload.len() as u64).to_be_bytes()).to_vec();
        out.push(0xf7 + len_be.len() as u8);
        out.extend_from_slice(&len_be);
    }
    out.extend_from_slice(&payload);
    out
}

// --- Parse/format helpers ---

fn parse_address(s: &str) -> Result<Address, MarketError> {
    Address::from_str(s).map_err(|_| MarketError::Permanent(format!("invalid address: {s}")))
}

fn parse_b256(s: &str) -> Result<[u8; 32], MarketError> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex_str)
        .map_err(|_| MarketError::Permanent(format!("invalid condition id: {s}")))?;
    if bytes.len() != 32 {
        return Err(MarketError::Permanent(format!("condition id length {}", bytes.len())));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn parse_hex_u256(s: &str) -> Result<U256, MarketError> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    if hex_str.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(hex_str, 16)
        .map_err(|_| MarketError::Transient(format!("bad hex quantity: {s}")))
}

fn fmt_addr(addr: Address) -> String {
    format!("{:?}", addr)
}

fn fmt_bytes(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

fn wei_to_usd(wei: U256, pol_usd: Decimal) -> Decimal {
    // 1e18 wei per POL; saturate rather than error for display-scale values.
    let wei_u128: u128 = wei.try_into().unwrap_or(u128::MAX);
    let wei_dec = Decimal::from_u128(wei_u128).unwrap_or(Decimal::MAX);
    (wei_dec / dec!(1000000000000000000)) * pol_usd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_kind_codes() {
        assert_eq!(WalletKind::from_signature_type(0), Some(WalletKind::Eoa));
        assert_eq!(WalletKind::from_signature_type(1), Some(WalletKind::Proxy));
        // Multi-sig proxies unsupported
        assert_eq!(WalletKind::from_signature_type(2), None);
    }

    #[test]
    fn test_merge_calldata_layout() {
        let collateral = Address::from_str("0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174").unwrap();
        let condition = [0xaau8; 32];
        let data = encode_merge_positions(collateral, condition, U256::from(5_000_000u64));

        assert_eq!(&data[0..4], &selector("mergePositions(address,bytes32,bytes32,uint256[],uint256)"));
        // 4 selector + 5 head words + 3 tail words
        assert_eq!(data.len(), 4 + 8 * 32);
        // partition length and members
        assert_eq!(data[4 + 5 * 32 + 31], 2);
        assert_eq!(data[4 + 6 * 32 + 31], 1);
        assert_eq!(data[4 + 7 * 32 + 31], 2);
    }

    #[test]
    fn test_proxy_exec_wraps_inner_call() {
        let to = Address::from_str("0x4D97DCd97eC945f40cF65F87097ACe5EA0476045").unwrap();
        let owner = Address::from_str("0x1111111111111111111111111111111111111111").unwrap();
        let inner = vec![0xde, 0xad, 0xbe, 0xef];
        let out = encode_proxy_exec(to, &inner, owner);

        // data length word sits at head(10 words) offset
        let len_word = &out[4 + 10 * 32..4 + 11 * 32];
        assert_eq!(len_word[31], 4);
        // inner bytes follow, padded to a word
        assert_eq!(&out[4 + 11 * 32..4 + 11 * 32 + 4], &inner[..]);
    }

    #[test]
    fn test_rlp_canonical_forms() {
        assert_eq!(rlp_item(&[]), vec![0x80]);
        assert_eq!(rlp_item(&[0x7f]), vec![0x7f]);
        assert_eq!(rlp_item(&[0x80]), vec![0x81, 0x80]);
        assert_eq!(rlp_uint(U256::ZERO), vec![0x80]);
        assert_eq!(rlp_uint(U256::from(15u64)), vec![0x0f]);
        assert_eq!(rlp_uint(U256::from(1024u64)), vec![0x82, 0x04, 0x00]);
        // canonical empty list
        assert_eq!(rlp_list(&[]), vec![0xc0]);
    }

    #[test]
    fn test_parse_hex_u256() {
        assert_eq!(parse_hex_u256("0x0").unwrap(), U256::ZERO);
        assert_eq!(parse_hex_u256("0x10").unwrap(), U256::from(16u64));
        assert_eq!(parse_hex_u256("0x").unwrap(), U256::ZERO);
        assert!(parse_hex_u256("0xzz").is_err());
    }

    #[test]
    fn test_wei_to_usd() {
        // 0.01 POL at $0.40 = $0.004
        let wei = U256::from(10_000_000_000_000_000u64);
        assert_eq!(wei_to_usd(wei, dec!(0.40)), dec!(0.004));
    }

    #[test]
    fn test_proxy_requires_address() {
        let config = CtfConfig::default();
        let key = "0x0000000000000000000000000000000000000000000000000000000000000001";
        let err = CtfMerger::new(config, WalletKind::Proxy, key).err().unwrap();
        assert!(matches!(err, MarketError::Permanent(_)));
    }
}
