use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use evm_node::machine::Frame;
use evm_node::state::{parse_h160, parse_hex, parse_u256};
use evm_node::{disasm, opcodes, rpc, AccountStore, BlockEnv, Chain, Evm, Halt, JournaledState, Message, NodeConfig, TxEnv};
use primitive_types::{H160, U256};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "evm", about = "EVM interpreter and development node")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Run EVM bytecode
    Run {
        /// Hex bytecode (e.g., 0x6001600101) or @file
        code: String,
        /// Gas limit
        #[arg(long, default_value_t = 10_000_000)]
        gas: u64,
        /// Calldata as hex
        #[arg(long, default_value = "0x")]
        calldata: String,
        /// Print full stack
        #[arg(long)]
        dump_stack: bool,
        /// World JSON file (accounts map)
        #[arg(long)]
        world: Option<String>,
        /// Context address (0x..)
        #[arg(long)]
        address: Option<String>,
        /// Msg caller (0x..)
        #[arg(long)]
        caller: Option<String>,
        /// Tx origin (0x..)
        #[arg(long)]
        origin: Option<String>,
        /// Call value (0x.. or decimal), credited to the caller before the call
        #[arg(long, default_value = "0x0")]
        value: String,
        /// Gas price (0x.. or decimal)
        #[arg(long, default_value = "0x0")]
        gas_price: String,
        /// Block coinbase (0x..)
        #[arg(long)]
        coinbase: Option<String>,
        /// Block timestamp (unix seconds)
        #[arg(long)]
        timestamp: Option<u64>,
        /// Block number
        #[arg(long)]
        number: Option<u64>,
        /// Block gas limit
        #[arg(long)]
        block_gas_limit: Option<u64>,
        /// Chain id
        #[arg(long)]
        chainid: Option<u64>,
        /// Dump final world JSON to stdout, or to a file with @path
        #[arg(long)]
        dump_world: Option<Option<String>>,
    },
    /// Disassemble bytecode
    Disasm {
        /// Hex bytecode or @file
        code: String,
    },
    /// Step-through trace
    Trace {
        /// Hex bytecode or @file
        code: String,
        /// Calldata as hex
        #[arg(long, default_value = "0x")]
        calldata: String,
        /// Gas limit
        #[arg(long, default_value_t = 10_000_000)]
        gas: u64,
        /// Max steps
        #[arg(long, default_value_t = 10_000)]
        max_steps: usize,
        /// World JSON file (accounts map)
        #[arg(long)]
        world: Option<String>,
        /// Context address (0x..)
        #[arg(long)]
        address: Option<String>,
        /// Msg caller (0x..)
        #[arg(long)]
        caller: Option<String>,
    },
    /// Serve the JSON-RPC API over a local chain
    Node {
        /// Node config JSON file
        #[arg(long)]
        config: Option<String>,
        /// Override the chain id
        #[arg(long)]
        chain_id: Option<u64>,
        /// Listen address, e.g. 127.0.0.1:8545
        #[arg(long)]
        listen: Option<String>,
        /// Seconds between empty blocks; 0 disables the block producer
        #[arg(long)]
        block_time: Option<u64>,
        /// Seal this many empty blocks before serving
        #[arg(long, default_value_t = 0)]
        blocks: u64,
        /// Log filter used when RUST_LOG is unset
        #[arg(long, default_value = "info")]
        log_level: String,
    },
}

/// Execution context shared by `run` and `trace`.
struct Setup {
    state: JournaledState,
    block: BlockEnv,
    tx: TxEnv,
    msg: Message,
}

fn main() {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Run {
            code,
            gas,
            calldata,
            dump_stack,
            world,
            address,
            caller,
            origin,
            value,
            gas_price,
            coinbase,
            timestamp,
            number,
            block_gas_limit,
            chainid,
            dump_world,
        } => {
            let mut setup = setup(&code, &calldata, gas, world.as_deref(), address.as_deref(), caller.as_deref());
            setup.tx.origin = match origin.as_deref() {
                Some(o) => parse_h160(o).unwrap_or_else(|| die("Invalid --origin")),
                None => setup.msg.caller,
            };
            setup.tx.gas_price = parse_u256(&gas_price).unwrap_or_else(|| die("Invalid --gas-price"));
            setup.msg.value = parse_u256(&value).unwrap_or_else(|| die("Invalid --value"));
            if !setup.msg.value.is_zero() {
                setup.state.add_balance(setup.msg.caller, setup.msg.value);
            }
            if let Some(cb) = coinbase {
                setup.block.coinbase = parse_h160(&cb).unwrap_or_else(|| die("Invalid --coinbase"));
            }
            if let Some(t) = timestamp {
                setup.block.timestamp = t;
            }
            if let Some(n) = number {
                setup.block.number = n;
            }
            if let Some(gl) = block_gas_limit {
                setup.block.gas_limit = gl;
            }
            if let Some(cid) = chainid {
                setup.block.chain_id = cid;
            }
            run_cmd(setup, dump_stack, dump_world.flatten())
        }
        Cmd::Disasm { code } => disasm_cmd(&code),
        Cmd::Trace { code, calldata, gas, max_steps, world, address, caller } => {
            let setup = setup(&code, &calldata, gas, world.as_deref(), address.as_deref(), caller.as_deref());
            trace_cmd(setup, max_steps)
        }
        Cmd::Node { config, chain_id, listen, block_time, blocks, log_level } => {
            node_cmd(config.as_deref(), chain_id, listen, block_time, blocks, &log_level)
        }
    }
}

fn setup(
    code_arg: &str,
    calldata_hex: &str,
    gas: u64,
    world_path: Option<&str>,
    address_hex: Option<&str>,
    caller_hex: Option<&str>,
) -> Setup {
    let code = read_code_arg(code_arg);
    let calldata = parse_hex(calldata_hex).unwrap_or_else(|| die("Invalid calldata hex"));
    let address = address_hex.map_or(H160::zero(), |a| parse_h160(a).unwrap_or_else(|| die("Invalid --address")));
    let caller = caller_hex.map_or(H160::zero(), |c| parse_h160(c).unwrap_or_else(|| die("Invalid --caller")));

    let mut store = world_path.map_or_else(AccountStore::new, load_world);
    let mut account = store.get(&address).cloned().unwrap_or_default();
    account.code = code;
    store.insert(address, account);

    Setup {
        state: JournaledState::new(store),
        block: BlockEnv { gas_limit: gas, ..BlockEnv::default() },
        tx: TxEnv { origin: caller, gas_price: U256::zero() },
        msg: Message::call(caller, address, U256::zero(), calldata, gas),
    }
}

/// Top-level frame as of its last executed instruction.
struct Snapshot {
    pc: usize,
    stack: Vec<U256>,
}

fn run_cmd(mut setup: Setup, dump_stack: bool, dump_world: Option<String>) {
    let mut evm = Evm::new(&mut setup.state, &setup.block, setup.tx);
    evm.begin(setup.msg);
    let mut last = None;
    loop {
        if let Some(frame) = evm.current().filter(|f| f.depth == 0) {
            last = Some(Snapshot { pc: frame.pc, stack: frame.stack.clone() });
        }
        if !evm.step() {
            break;
        }
    }
    let result = evm.finish();
    if let Halt::Exception(e) = &result.halt {
        die(&format!("Execution error: {e}"));
    }

    println!("halted: {}", halt_status(&result.halt));
    if !result.output.is_empty() {
        println!("return: 0x{}", hex::encode(&result.output));
    }
    if let Some(snapshot) = &last {
        println!("pc: {}", snapshot.pc);
    }
    println!("gas left: {}", result.gas_left);
    let stack = last.map(|s| s.stack).unwrap_or_default();
    println!("stack size: {}", stack.len());
    if let Some(top) = stack.last() {
        println!("top: 0x{:x}", top);
    }
    if dump_stack {
        for (i, v) in stack.iter().rev().enumerate() {
            println!("[{}] 0x{:x}", i, v);
        }
    }
    if !result.logs.is_empty() {
        println!("logs: {}", result.logs.len());
    }
    if let Some(dw) = dump_world {
        let json = serde_json::to_string_pretty(&setup.state.store().to_json())
            .unwrap_or_else(|e| die(&format!("encode world: {e}")));
        match dw.strip_prefix('@') {
            Some(path) => std::fs::write(path, json).unwrap_or_else(|e| die(&format!("write world: {e}"))),
            None => println!("{}", json),
        }
    }
}

fn disasm_cmd(code_arg: &str) {
    let code = read_code_arg(code_arg);
    for line in disasm::disassemble(&code) {
        println!("{}", line);
    }
}

fn trace_cmd(mut setup: Setup, max_steps: usize) {
    let mut evm = Evm::new(&mut setup.state, &setup.block, setup.tx);
    evm.begin(setup.msg);
    let mut steps = 0usize;
    while steps < max_steps {
        let Some(frame) = evm.current() else { break };
        println!("{}", trace_line(frame));
        steps += 1;
        if !evm.step() {
            break;
        }
    }
    if evm.current().is_some() {
        println!("-- stopped after {} steps --", steps);
        return;
    }
    let result = evm.finish();
    println!("-- halt: {} --", halt_status(&result.halt));
    if !result.output.is_empty() {
        println!("return: 0x{}", hex::encode(&result.output));
    }
    println!("gas left: {}", result.gas_left);
}

fn trace_line(frame: &Frame) -> String {
    let op = frame.code.get(frame.pc).copied().unwrap_or(opcodes::STOP);
    format!(
        "depth={} pc={:04x} op=0x{:02x} {:8} stack={:2} top={} gas={}",
        frame.depth,
        frame.pc,
        op,
        opcodes::name(op).unwrap_or("?"),
        frame.stack.len(),
        frame.stack.last().map(|v| format!("0x{:x}", v)).unwrap_or_else(|| "-".to_string()),
        frame.gas,
    )
}

fn node_cmd(
    config_path: Option<&str>,
    chain_id: Option<u64>,
    listen: Option<String>,
    block_time: Option<u64>,
    blocks: u64,
    log_level: &str,
) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match config_path {
        Some(path) => NodeConfig::load(path).unwrap_or_else(|e| die(&e.to_string())),
        None => NodeConfig::default(),
    };
    if let Some(id) = chain_id {
        config.chain_id = id;
    }
    if let Some(addr) = listen {
        config.listen = addr;
    }
    if let Some(secs) = block_time {
        config.block_time = secs;
    }
    let http_addr: SocketAddr = config.listen.parse().unwrap_or_else(|_| die("Invalid listen address"));

    let mut chain = Chain::new(config).unwrap_or_else(|e| die(&e.to_string()));
    for _ in 0..blocks {
        chain.seal_block();
    }

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| die(&format!("start runtime: {e}")));
    if let Err(e) = runtime.block_on(rpc::start_api(http_addr, chain)) {
        die(&e.to_string());
    }
}

fn read_code_arg(arg: &str) -> Vec<u8> {
    if let Some(rest) = arg.strip_prefix('@') {
        std::fs::read(rest).unwrap_or_else(|e| die(&format!("Failed to read file: {e}")))
    } else {
        parse_hex(arg).unwrap_or_else(|| die("Invalid code hex"))
    }
}

fn die(msg: &str) -> ! {
    eprintln!("{}", msg);
    std::process::exit(1);
}

fn halt_status(halt: &Halt) -> String {
    match halt {
        Halt::Stop => "STOP".to_string(),
        Halt::Return => "RETURN".to_string(),
        Halt::Revert => "REVERT".to_string(),
        Halt::Exception(e) => format!("EXCEPTION ({e})"),
    }
}

fn load_world(path: &str) -> AccountStore {
    let txt = std::fs::read_to_string(path).unwrap_or_else(|e| die(&format!("read world: {e}")));
    let v: serde_json::Value =
        serde_json::from_str(&txt).unwrap_or_else(|e| die(&format!("parse world json: {e}")));
    AccountStore::from_json(&v).unwrap_or_else(|e| die(&format!("load world: {e}")))
}
