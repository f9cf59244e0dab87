use primitive_types::H256;
use serde_json::{json, Value};

use crate::chain::BlockTag;
use crate::filter::{collect_logs, FilterChanges, FilterKind, LogFilter};
use crate::rpc::types::rpc_logs;
use crate::rpc::utils::{param, parse_address, parse_block_tag, parse_hash, parse_u64, quantity, RpcErr};
use crate::rpc::{RpcApiContext, RpcHandler};

fn parse_topic_slot(value: &Value) -> Result<Option<Vec<H256>>, RpcErr> {
    match value {
        Value::Null => Ok(None),
        Value::Array(alternatives) => {
            let topics = alternatives.iter().map(|t| parse_hash(t, "topics")).collect::<Result<Vec<_>, _>>()?;
            Ok(Some(topics))
        }
        single => Ok(Some(vec![parse_hash(single, "topics")?])),
    }
}

/// Parse `{fromBlock, toBlock, address, topics}`; missing bounds default to `latest`.
pub fn parse_log_filter(value: &Value) -> Result<LogFilter, RpcErr> {
    let object = value.as_object().ok_or_else(|| RpcErr::WrongParam("filter".to_string()))?;
    let field = |name: &'static str| object.get(name).filter(|v| !v.is_null());
    let tag = |name: &'static str| field(name).map_or(Ok(BlockTag::Latest), |v| parse_block_tag(v, name));

    let addresses = match field("address") {
        None => Vec::new(),
        Some(Value::Array(list)) => list.iter().map(|a| parse_address(a, "address")).collect::<Result<_, _>>()?,
        Some(single) => vec![parse_address(single, "address")?],
    };
    let topics = match field("topics") {
        None => Vec::new(),
        Some(Value::Array(slots)) => slots.iter().map(parse_topic_slot).collect::<Result<_, _>>()?,
        Some(_) => return Err(RpcErr::WrongParam("topics".to_string())),
    };
    Ok(LogFilter { from_block: tag("fromBlock")?, to_block: tag("toBlock")?, addresses, topics })
}

fn filter_id(params: &Option<Vec<Value>>) -> Result<u64, RpcErr> {
    parse_u64(param(params, 0, "filter id")?, "filter id")
}

pub struct LogsRequest {
    pub filter: LogFilter,
}

impl RpcHandler for LogsRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { filter: parse_log_filter(param(params, 0, "filter")?)? })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let chain = context.chain()?;
        Ok(rpc_logs(&collect_logs(&chain, &self.filter)))
    }
}

pub struct NewFilterRequest {
    pub filter: LogFilter,
}

impl RpcHandler for NewFilterRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { filter: parse_log_filter(param(params, 0, "filter")?)? })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let head = context.chain()?.latest_number();
        let id = context.filters()?.install(FilterKind::Log(self.filter.clone()), head);
        Ok(json!(quantity(id)))
    }
}

pub struct NewBlockFilterRequest;

impl RpcHandler for NewBlockFilterRequest {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let head = context.chain()?.latest_number();
        Ok(json!(quantity(context.filters()?.install(FilterKind::Block, head))))
    }
}

pub struct NewPendingTransactionFilterRequest;

impl RpcHandler for NewPendingTransactionFilterRequest {
    fn parse(_params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self)
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let head = context.chain()?.latest_number();
        Ok(json!(quantity(context.filters()?.install(FilterKind::PendingTransaction, head))))
    }
}

pub struct FilterChangesRequest {
    pub id: u64,
}

impl RpcHandler for FilterChangesRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { id: filter_id(params)? })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let chain = context.chain()?;
        let changes = context.filters()?.changes(self.id, &chain)?;
        Ok(match changes {
            FilterChanges::Hashes(hashes) => json!(hashes),
            FilterChanges::Logs(logs) => rpc_logs(&logs),
        })
    }
}

pub struct FilterLogsRequest {
    pub id: u64,
}

impl RpcHandler for FilterLogsRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { id: filter_id(params)? })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        let chain = context.chain()?;
        let logs = context.filters()?.logs(self.id, &chain)?;
        Ok(rpc_logs(&logs))
    }
}

pub struct DeleteFilterRequest {
    pub id: u64,
}

impl RpcHandler for DeleteFilterRequest {
    fn parse(params: &Option<Vec<Value>>) -> Result<Self, RpcErr> {
        Ok(Self { id: filter_id(params)? })
    }

    fn handle(&self, context: &RpcApiContext) -> Result<Value, RpcErr> {
        context.filters()?.uninstall(self.id)?;
        Ok(json!(true))
    }
}
