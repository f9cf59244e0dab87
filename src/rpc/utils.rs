//! JSON-RPC envelope types, error codes and parameter parsing helpers.

use primitive_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::BlockTag;
use crate::executor::CallError;
use crate::filter::FilterError;
use crate::transaction::TxError;

/// Error type for JSON-RPC method failures.
///
/// - `-32601`: method not found
/// - `-32602`: missing or malformed params
/// - `-32603`: internal error
/// - `-32000`: generic server error
/// - `-32015`: VM error during `eth_call` / `eth_estimateGas`
/// - `3`: execution reverted
#[derive(Debug, thiserror::Error)]
pub enum RpcErr {
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Wrong parameter: {0}")]
    WrongParam(String),
    #[error("Invalid params: {0}")]
    BadParams(String),
    #[error("Missing parameter: {0}")]
    MissingParam(String),
    #[error("{0}")]
    Server(String),
    #[error("Internal Error: {0}")]
    Internal(String),
    #[error("Vm execution error: {0}")]
    Vm(String),
    #[error("execution reverted: data={data}")]
    Revert { data: String },
}

impl From<RpcErr> for RpcErrorMetadata {
    fn from(value: RpcErr) -> Self {
        match value {
            RpcErr::MethodNotFound(bad_method) => RpcErrorMetadata {
                code: -32601,
                data: None,
                message: format!("Method not found: {bad_method}"),
            },
            RpcErr::WrongParam(field) => RpcErrorMetadata {
                code: -32602,
                data: None,
                message: format!("Field '{field}' is incorrect or has an unknown format"),
            },
            RpcErr::BadParams(context) => RpcErrorMetadata {
                code: -32602,
                data: None,
                message: format!("Invalid params: {context}"),
            },
            RpcErr::MissingParam(parameter_name) => RpcErrorMetadata {
                code: -32602,
                data: None,
                message: format!("Expected parameter: {parameter_name} is missing"),
            },
            RpcErr::Server(message) => RpcErrorMetadata { code: -32000, data: None, message },
            RpcErr::Internal(context) => RpcErrorMetadata {
                code: -32603,
                data: None,
                message: format!("Internal Error: {context}"),
            },
            RpcErr::Vm(context) => RpcErrorMetadata {
                code: -32015,
                data: None,
                message: format!("Vm execution error: {context}"),
            },
            RpcErr::Revert { data } => {
                let message = match get_message_from_revert_data(&data) {
                    Some(reason) => format!("execution reverted: {reason}"),
                    None => "execution reverted".to_string(),
                };
                RpcErrorMetadata { code: 3, data: Some(data), message }
            }
        }
    }
}

impl From<serde_json::Error> for RpcErr {
    fn from(error: serde_json::Error) -> Self {
        Self::BadParams(error.to_string())
    }
}

impl From<TxError> for RpcErr {
    fn from(err: TxError) -> Self {
        Self::Server(err.to_string())
    }
}

impl From<FilterError> for RpcErr {
    fn from(err: FilterError) -> Self {
        Self::Server(err.to_string())
    }
}

impl From<CallError> for RpcErr {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Tx(e) => e.into(),
            CallError::Reverted(data) => Self::Revert { data: hex_data(&data) },
            CallError::Vm(e) => Self::Vm(e.to_string()),
        }
    }
}

/// Decode an `Error(string)` revert payload. Returns `None` when the data is
/// not an ABI-encoded reason string.
pub fn get_message_from_revert_data(data: &str) -> Option<String> {
    let bytes = hex::decode(data.strip_prefix("0x")?).ok()?;
    // Error(string) selector
    if !bytes.starts_with(&[0x08, 0xc3, 0x79, 0xa0]) {
        return None;
    }
    let args = &bytes[4..];
    let word = |at: usize| -> Option<usize> {
        let value = U256::from_big_endian(args.get(at..at.checked_add(32)?)?);
        (value <= U256::from(args.len())).then(|| value.as_usize())
    };
    let offset = word(0)?;
    let len = word(offset)?;
    let start = offset + 32;
    let text = args.get(start..start.checked_add(len)?)?;
    String::from_utf8(text.to_vec()).ok()
}

pub enum RpcNamespace {
    Eth,
    Web3,
    Net,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcRequestId {
    Number(u64),
    String(String),
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcRequest {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Vec<Value>>,
}

impl RpcRequest {
    pub fn namespace(&self) -> Result<RpcNamespace, RpcErr> {
        let mut parts = self.method.split('_');
        let Some(namespace) = parts.next() else {
            return Err(RpcErr::MethodNotFound(self.method.clone()));
        };
        resolve_namespace(namespace, self.method.clone())
    }

    pub fn new(method: &str, params: Option<Vec<Value>>) -> Self {
        RpcRequest { id: RpcRequestId::Number(1), jsonrpc: "2.0".to_string(), method: method.to_string(), params }
    }
}

pub fn resolve_namespace(maybe_namespace: &str, method: String) -> Result<RpcNamespace, RpcErr> {
    match maybe_namespace {
        "eth" => Ok(RpcNamespace::Eth),
        "web3" => Ok(RpcNamespace::Web3),
        "net" => Ok(RpcNamespace::Net),
        _ => Err(RpcErr::MethodNotFound(method)),
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcErrorMetadata {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcSuccessResponse {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub result: Value,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcErrorResponse {
    pub id: RpcRequestId,
    pub jsonrpc: String,
    pub error: RpcErrorMetadata,
}

/// `0x`-prefixed hex of raw bytes.
pub fn hex_data(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// `0x`-prefixed quantity without leading zeros.
pub fn quantity(n: u64) -> String {
    format!("{n:#x}")
}

/// The `index`th positional parameter; absent params count as missing.
pub fn param<'a>(params: &'a Option<Vec<Value>>, index: usize, name: &str) -> Result<&'a Value, RpcErr> {
    params
        .as_ref()
        .and_then(|p| p.get(index))
        .filter(|v| !v.is_null())
        .ok_or_else(|| RpcErr::MissingParam(name.to_string()))
}

pub fn optional_param(params: &Option<Vec<Value>>, index: usize) -> Option<&Value> {
    params.as_ref().and_then(|p| p.get(index)).filter(|v| !v.is_null())
}

fn as_str<'a>(value: &'a Value, name: &str) -> Result<&'a str, RpcErr> {
    value.as_str().ok_or_else(|| RpcErr::WrongParam(name.to_string()))
}

pub fn parse_bytes(value: &Value, name: &str) -> Result<Vec<u8>, RpcErr> {
    let s = as_str(value, name)?;
    let digits = s.strip_prefix("0x").ok_or_else(|| RpcErr::WrongParam(name.to_string()))?;
    hex::decode(digits).map_err(|_| RpcErr::WrongParam(name.to_string()))
}

pub fn parse_address(value: &Value, name: &str) -> Result<H160, RpcErr> {
    let bytes = parse_bytes(value, name)?;
    if bytes.len() != 20 {
        return Err(RpcErr::WrongParam(name.to_string()));
    }
    Ok(H160::from_slice(&bytes))
}

pub fn parse_hash(value: &Value, name: &str) -> Result<H256, RpcErr> {
    let bytes = parse_bytes(value, name)?;
    if bytes.len() != 32 {
        return Err(RpcErr::WrongParam(name.to_string()));
    }
    Ok(H256::from_slice(&bytes))
}

pub fn parse_u256(value: &Value, name: &str) -> Result<U256, RpcErr> {
    let s = as_str(value, name)?;
    let digits = s.strip_prefix("0x").filter(|d| !d.is_empty() && d.len() <= 64);
    digits
        .and_then(|d| U256::from_str_radix(d, 16).ok())
        .ok_or_else(|| RpcErr::WrongParam(name.to_string()))
}

pub fn parse_u64(value: &Value, name: &str) -> Result<u64, RpcErr> {
    let n = parse_u256(value, name)?;
    if n > U256::from(u64::MAX) {
        return Err(RpcErr::WrongParam(name.to_string()));
    }
    Ok(n.low_u64())
}

pub fn parse_block_tag(value: &Value, name: &str) -> Result<BlockTag, RpcErr> {
    BlockTag::parse(as_str(value, name)?).ok_or_else(|| RpcErr::WrongParam(name.to_string()))
}

/// Block tag at `index`, defaulting to `latest` when omitted.
pub fn block_tag_or_latest(params: &Option<Vec<Value>>, index: usize) -> Result<BlockTag, RpcErr> {
    optional_param(params, index).map_or(Ok(BlockTag::Latest), |v| parse_block_tag(v, "block"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_revert_reason() {
        // Error("nope")
        let data = "0x08c379a0\
            0000000000000000000000000000000000000000000000000000000000000020\
            0000000000000000000000000000000000000000000000000000000000000004\
            6e6f706500000000000000000000000000000000000000000000000000000000";
        assert_eq!(get_message_from_revert_data(data), Some("nope".to_string()));
        // Same reason behind a 0x40 offset with one padding word.
        let padded = "0x08c379a0\
            0000000000000000000000000000000000000000000000000000000000000040\
            0000000000000000000000000000000000000000000000000000000000000000\
            0000000000000000000000000000000000000000000000000000000000000004\
            6e6f706500000000000000000000000000000000000000000000000000000000";
        assert_eq!(get_message_from_revert_data(padded), Some("nope".to_string()));
        let truncated = &data[..data.len() - 64];
        assert_eq!(get_message_from_revert_data(truncated), None);
        assert_eq!(get_message_from_revert_data("0x"), None);
        assert_eq!(get_message_from_revert_data("0x2a"), None);
    }

    #[test]
    fn param_codes() {
        let missing: RpcErrorMetadata = RpcErr::MissingParam("filter".into()).into();
        assert_eq!(missing.code, -32602);
        let revert: RpcErrorMetadata = RpcErr::Revert { data: "0x".into() }.into();
        assert_eq!(revert.code, 3);
        assert_eq!(revert.data.as_deref(), Some("0x"));
    }

    #[test]
    fn parses_params() {
        let params = Some(vec![json!("0x10"), Value::Null]);
        assert_eq!(parse_u64(param(&params, 0, "n").unwrap(), "n").unwrap(), 16);
        assert!(matches!(param(&params, 1, "tag"), Err(RpcErr::MissingParam(_))));
        assert_eq!(block_tag_or_latest(&params, 1).unwrap(), BlockTag::Latest);
        assert!(parse_address(&json!("0x1234"), "a").is_err());
        assert!(parse_u256(&json!("12"), "v").is_err());
        assert_eq!(quantity(0), "0x0");
        assert_eq!(quantity(255), "0xff");
    }
}
