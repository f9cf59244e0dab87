use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const CONTRACT: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const CALLEE: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

fn evm(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_evm")).args(args).output().expect("spawn evm")
}

/// Stdout of a run that must exit 0.
fn ok(args: &[&str]) -> String {
    let out = evm(args);
    let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
    assert!(out.status.success(), "args={args:?}\nstdout={stdout}\nstderr={}", String::from_utf8_lossy(&out.stderr));
    stdout
}

/// Stderr of a run that must fail.
fn fails(args: &[&str]) -> String {
    let out = evm(args);
    assert!(!out.status.success(), "args={args:?} unexpectedly succeeded");
    String::from_utf8_lossy(&out.stderr).into_owned()
}

fn temp(name: &str, contents: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("evm_cli_{name}_{}", std::process::id()));
    fs::write(&path, contents).expect("write temp file");
    path
}

fn arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

#[test]
fn disasm_lists_instructions() {
    let stdout = ok(&["disasm", "0x600160010100"]);
    assert!(stdout.contains("0000: PUSH1 0x01"), "stdout={stdout}");
    assert!(stdout.contains("0004: ADD"), "stdout={stdout}");
    assert!(stdout.contains("0005: STOP"), "stdout={stdout}");
}

#[test]
fn run_reports_final_stack() {
    // PUSH1 1; PUSH1 1; ADD; STOP
    let stdout = ok(&["run", "0x600160010100", "--dump-stack"]);
    assert!(stdout.contains("halted: STOP"), "stdout={stdout}");
    assert!(stdout.contains("stack size: 1"), "stdout={stdout}");
    assert!(stdout.contains("top: 0x2"), "stdout={stdout}");
    assert!(stdout.contains("[0] 0x2"), "stdout={stdout}");

    let code = temp("add", &[0x60, 0x01, 0x60, 0x01, 0x01, 0x00]);
    let from_file = ok(&["run", &format!("@{}", code.display())]);
    assert!(from_file.contains("top: 0x2"), "stdout={from_file}");
}

#[test]
fn run_rejects_bad_input() {
    assert!(fails(&["run", "0x0"]).contains("Invalid code hex"));
    assert!(fails(&["run", "0x00", "--caller", "0x12"]).contains("Invalid --caller"));
    assert!(fails(&["run", "@/nonexistent/evm-code"]).contains("Failed to read file"));
}

#[test]
fn run_halts() {
    // mstore8(0, 0x2a); revert(0, 1)
    let stdout = ok(&["run", "0x602a60005360016000fd"]);
    assert!(stdout.contains("halted: REVERT"), "stdout={stdout}");
    assert!(stdout.contains("return: 0x2a"), "stdout={stdout}");

    assert!(fails(&["run", "0xfe"]).contains("Execution error"));
}

#[test]
fn run_exposes_call_context() {
    // ADDRESS; CALLER; ORIGIN; STOP
    let origin = "0xcccccccccccccccccccccccccccccccccccccccc";
    let stdout = ok(&["run", "0x30333200", "--dump-stack", "--address", CONTRACT, "--caller", CALLEE, "--origin", origin]);
    assert!(stdout.contains(&format!("top: {origin}")), "stdout={stdout}");
    assert!(stdout.contains(&format!("[1] {CALLEE}")), "stdout={stdout}");
    assert!(stdout.contains(&format!("[2] {CONTRACT}")), "stdout={stdout}");
}

#[test]
fn run_exposes_block_context() {
    // CALLVALUE; GASPRICE; CHAINID; NUMBER; TIMESTAMP; COINBASE; STOP
    let stdout = ok(&[
        "run",
        "0x343a4643424100",
        "--dump-stack",
        "--value",
        "0x05",
        "--gas-price",
        "0x07",
        "--chainid",
        "43",
        "--number",
        "123",
        "--timestamp",
        "456",
        "--coinbase",
        "0x00000000000000000000000000000000000000ff",
    ]);
    let expected = ["[0] 0xff\n", "[1] 0x1c8\n", "[2] 0x7b\n", "[3] 0x2b\n", "[4] 0x7\n", "[5] 0x5\n"];
    for line in expected {
        assert!(stdout.contains(line), "missing {line:?}: {stdout}");
    }
}

#[test]
fn run_reads_and_dumps_world() {
    let world = temp(
        "world.json",
        br#"{ "accounts": {
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": { "balance": "0x10", "code": "0x", "storage": { "0x01": "0x02" } }
        } }"#,
    );
    // SELFBALANCE; STOP
    let stdout = ok(&["run", "0x4700", "--world", arg(&world), "--address", CONTRACT]);
    assert!(stdout.contains("top: 0x10"), "stdout={stdout}");

    let dumped = ok(&["run", "0x00", "--world", arg(&world), "--dump-world"]);
    assert!(dumped.contains("\"accounts\""), "stdout={dumped}");
    assert!(dumped.contains(CONTRACT), "stdout={dumped}");

    // sstore(1, 3) persists into the dumped file.
    let out_path = std::env::temp_dir().join(format!("evm_cli_dump_{}.json", std::process::id()));
    ok(&["run", "0x6003600155", "--world", arg(&world), "--address", CONTRACT, "--dump-world", &format!("@{}", out_path.display())]);
    let text = fs::read_to_string(&out_path).expect("read dumped world");
    let v: serde_json::Value = serde_json::from_str(&text).expect("dumped world is json");
    assert_eq!(v["accounts"][CONTRACT]["storage"]["0x1"], "0x3", "world={v}");
}

#[test]
fn run_counts_logs() {
    // mstore8(0, 0x41); log0(0, 1); STOP
    let stdout = ok(&["run", "0x604160005360016000a000"]);
    assert!(stdout.contains("logs: 1"), "stdout={stdout}");
}

#[test]
fn trace_prints_each_step() {
    let stdout = ok(&["trace", "0x600100", "--max-steps", "4"]);
    assert!(stdout.contains("depth=0 pc=0000 op=0x60 PUSH1"), "stdout={stdout}");
    assert!(stdout.contains("depth=0 pc=0002 op=0x00"), "stdout={stdout}");
    assert!(stdout.contains("-- halt: STOP --"), "stdout={stdout}");

    // JUMPDEST; PUSH1 0; JUMP
    let looping = ok(&["trace", "0x5b600056", "--max-steps", "5"]);
    assert!(looping.contains("-- stopped after 5 steps --"), "stdout={looping}");
}

#[test]
fn trace_follows_nested_calls() {
    // Callee: PUSH1 1; STOP
    let world = temp(
        "callee.json",
        br#"{ "accounts": { "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb": { "balance": "0x0", "code": "0x600100" } } }"#,
    );
    // call(0x4e20, 0xbb..bb, 0, 0, 0, 0, 0); STOP
    let code = format!("0x{}73{}614e20f100", "6000".repeat(5), "bb".repeat(20));
    let stdout = ok(&["trace", &code, "--world", arg(&world)]);
    assert!(stdout.contains("depth=1 pc=0000"), "stdout={stdout}");
    assert!(stdout.contains("-- halt: STOP --"), "stdout={stdout}");
}

#[test]
fn node_help_lists_flags() {
    let stdout = ok(&["node", "--help"]);
    for flag in ["--config", "--chain-id", "--listen", "--block-time", "--blocks", "--log-level"] {
        assert!(stdout.contains(flag), "missing {flag}: {stdout}");
    }
}

#[test]
fn node_rejects_bad_config() {
    let config = temp("config.json", b"{ not json");
    assert!(!fails(&["node", "--config", arg(&config)]).is_empty());
    assert!(fails(&["node", "--listen", "nowhere"]).contains("Invalid listen address"));
}
