use crate::opcodes::{immediate_size, name};

/// Render bytecode as one `pc: MNEMONIC [0ximmediate]` line per instruction.
/// Truncated PUSH data at the end of the code is shown as far as it goes.
pub fn disassemble(code: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let op = code[pc];
        let mut line = format!("{:04x}: ", pc);
        match name(op) {
            Some(mnemonic) => line.push_str(mnemonic),
            None => line.push_str(&format!("UNKNOWN(0x{:02x})", op)),
        }
        let n = immediate_size(op);
        if n > 0 {
            let start = pc + 1;
            let end = (start + n).min(code.len());
            line.push_str(" 0x");
            for b in &code[start..end] {
                line.push_str(&format!("{:02x}", b));
            }
        }
        out.push(line);
        pc += 1 + n;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_with_immediate() {
        let lines = disassemble(&[0x60, 0x2a, 0x60, 0x00, 0x55, 0x00]);
        assert_eq!(lines, vec!["0000: PUSH1 0x2a", "0002: PUSH1 0x00", "0004: SSTORE", "0005: STOP"]);
    }

    #[test]
    fn unknown_byte_and_truncated_push() {
        let lines = disassemble(&[0x0c, 0x61, 0xff]);
        assert_eq!(lines[0], "0000: UNKNOWN(0x0c)");
        assert_eq!(lines[1], "0001: PUSH2 0xff");
    }
}
