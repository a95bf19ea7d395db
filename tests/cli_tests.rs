use assert_cmd::Command;
use predicates::str::{contains, diff};

fn miniasm() -> Command {
    Command::cargo_bin("miniasm").unwrap()
}

#[test]
fn runs_hello_world() {
    let mut cmd = miniasm();
    cmd.arg("run").arg("tests/files/hello.asm");

    cmd.assert()
        .success()
        .stdout(contains("Hi!"))
        .stdout(contains("Execution successful"));
}

#[test]
fn minimal_register_dump() {
    let mut cmd = miniasm();
    cmd.arg("run").arg("tests/files/hello.asm").arg("--minimal");

    cmd.assert()
        .success()
        .stdout(contains("\nr0 0\n"))
        .stdout(contains("\nr1 33\n"))
        .stdout(contains("\nr2 3\n"))
        .stdout(contains("\nPC 162\n"))
        .stdout(contains("\nSP 1022\n"))
        .stdout(contains("\nST 0\n"));
}

#[test]
fn echoes_input_argument() {
    let mut cmd = miniasm();
    cmd.arg("run")
        .arg("tests/files/echo.asm")
        .arg("--input")
        .arg("abc");

    cmd.assert()
        .success()
        .stdout(contains("abc\n"))
        .stdout(contains("Execution successful"));
}

#[test]
fn echoes_piped_stdin() {
    let mut cmd = miniasm();
    cmd.arg("run").arg("tests/files/echo.asm").write_stdin("xyz");

    cmd.assert().success().stdout(contains("xyz\n"));
}

#[test]
fn step_limit_fails() {
    let mut cmd = miniasm();
    cmd.arg("run").arg("tests/files/spin.asm").arg("--minimal");

    cmd.assert()
        .failure()
        .stdout(contains("\nPC 128\n"))
        .stderr(contains("Program took too many steps (limit: 10000)"));
}

#[test]
fn stops_at_breakpoint() {
    let mut cmd = miniasm();
    cmd.arg("run").arg("tests/files/brk.asm").arg("--minimal");

    cmd.assert()
        .success()
        .stdout(contains("Breakpoint reached"))
        .stdout(contains("\nr0 1\n"))
        .stdout(contains("\nPC 132\n"));
}

#[test]
fn runs_hex_file() {
    let mut cmd = miniasm();
    cmd.arg("run").arg("tests/files/halt.hex").arg("--minimal");

    cmd.assert()
        .success()
        .stdout(contains("\nr0 5\n"))
        .stdout(contains("Execution successful"));
}

#[test]
fn rejects_malformed_hex() {
    let mut cmd = miniasm();
    cmd.arg("run").arg("tests/files/malformed.hex");

    cmd.assert()
        .failure()
        .stderr(contains("Malformed code string"));
}

#[test]
fn traces_events() {
    let mut cmd = miniasm();
    cmd.arg("run")
        .arg("tests/files/halt.hex")
        .arg("--trace")
        .arg("--minimal");

    cmd.assert().success().stderr(diff(
        "PC    <- 0x0082\nr0    <- 0x0005\nPC    <- 0x0084\n",
    ));
}

#[test]
fn traces_from_environment() {
    let mut cmd = miniasm();
    cmd.arg("run")
        .arg("tests/files/halt.hex")
        .env("MINIASM_TRACE", "1");

    cmd.assert().success().stderr(contains("r0    <- 0x0005"));
}

#[test]
fn traces_console_events_only() {
    let mut cmd = miniasm();
    cmd.arg("run")
        .arg("tests/files/hello.asm")
        .arg("--minimal")
        .env("MINIASM_TRACE", "io");

    cmd.assert()
        .success()
        .stderr(diff("output changed\noutput changed\noutput changed\n"));
}

#[test]
fn minimal_from_environment() {
    let mut cmd = miniasm();
    cmd.arg("run")
        .arg("tests/files/halt.hex")
        .env("MINIASM_MINIMAL", "1");

    cmd.assert().success().stdout(contains("\nr0 5\n"));
}

#[test]
fn checks_with_listing() {
    let mut cmd = miniasm();
    cmd.arg("check").arg("tests/files/tiny.asm").arg("--listing");

    cmd.assert()
        .success()
        .stdout(contains(" 128  5005     1 | MOVI r0 5\n"))
        .stdout(contains(" 130  6bfe     3 | JMP spin\n"))
        .stdout(contains("\n 130  spin:\n"));
}

#[test]
fn checks_valid_file() {
    let mut cmd = miniasm();
    cmd.arg("check").arg("tests/files/hello.asm");

    cmd.assert().success().stdout(contains("no errors found!"));
}

#[test]
fn reports_invalid_immediate() {
    let mut cmd = miniasm();
    cmd.arg("check").arg("tests/files/bad_imm.asm");

    cmd.assert()
        .failure()
        .stderr(contains("invalid immediate: 16"));
}

#[test]
fn reports_unknown_label() {
    let mut cmd = miniasm();
    cmd.arg("check").arg("tests/files/bad_label.asm");

    cmd.assert()
        .failure()
        .stderr(contains("unknown label: nowhere"));
}

#[test]
fn reports_duplicate_label() {
    let mut cmd = miniasm();
    cmd.arg("run").arg("tests/files/dup_label.asm");

    cmd.assert()
        .failure()
        .stderr(contains("duplicate label: a"));
}

#[test]
fn compiles_to_hex() {
    let dest = std::env::temp_dir().join(format!("miniasm-tiny-{}.hex", std::process::id()));
    let mut cmd = miniasm();
    cmd.arg("compile").arg("tests/files/tiny.asm").arg(&dest);

    cmd.assert().success().stdout(contains("Saved"));
    let hex = std::fs::read_to_string(&dest).unwrap();
    let _ = std::fs::remove_file(&dest);
    assert_eq!(hex, "50056bfe\n");
}

#[test]
fn disassembles_hex() {
    let mut cmd = miniasm();
    cmd.arg("disasm").arg("tests/files/tiny.hex");

    cmd.assert()
        .success()
        .stdout(diff(" 128  5005  MOVI r0 5\n 130  6bfe  JMP -2\n"));
}
