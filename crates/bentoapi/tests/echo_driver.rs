//! Runs the bento-echo driver the way the server does.

use std::io::Read;
use std::io::Write;
use std::process::Command;
use std::process::Stdio;

use bentowire::ExecPayload;
use bentowire::InputRecord;
use bentowire::OutputRecord;
use bentowire::RECORD_HEADER_LEN;
use bentowire::RecordHeader;

fn parse_records(mut bytes: &[u8]) -> Vec<OutputRecord> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        let header = RecordHeader::decode(&bytes[..RECORD_HEADER_LEN]).unwrap();
        let end = header.framed_len() as usize;
        out.push(OutputRecord { channel: header.channel, data: bytes[RECORD_HEADER_LEN..end].to_vec() });
        bytes = &bytes[end..];
    }
    out
}

fn run_echo(payload: &str, input: &[u8]) -> (std::process::ExitStatus, Vec<u8>, String) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_bento-echo"))
        .arg(payload)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(input).unwrap();
    drop(stdin);

    let mut stdout = Vec::new();
    child.stdout.take().unwrap().read_to_end(&mut stdout).unwrap();
    let mut stderr = String::new();
    child.stderr.take().unwrap().read_to_string(&mut stderr).unwrap();
    (child.wait().unwrap(), stdout, stderr)
}

#[test]
fn test_echo_until_stop() {
    let payload = ExecPayload::new("hello()", "").encode().unwrap();
    let input = [
        InputRecord::new("one").encode().unwrap(),
        InputRecord::new("").encode().unwrap(),
        InputRecord::new("stop").encode().unwrap(),
        InputRecord::new("never echoed").encode().unwrap(),
    ]
    .concat();

    let (status, stdout, _) = run_echo(&payload, &input);
    assert!(status.success());
    assert_eq!(
        parse_records(&stdout),
        vec![OutputRecord::stdout("hello()"), OutputRecord::stdout("one"), OutputRecord::stdout("")]
    );
}

#[test]
fn test_echo_until_input_closes() {
    let payload = ExecPayload::new("f()", "").encode().unwrap();
    let (status, stdout, _) = run_echo(&payload, &InputRecord::new("last").encode().unwrap());
    assert!(status.success());
    assert_eq!(parse_records(&stdout), vec![OutputRecord::stdout("f()"), OutputRecord::stdout("last")]);
}

#[test]
fn test_bad_payload_fails() {
    let (status, stdout, stderr) = run_echo("not base64!", &[]);
    assert!(!status.success());
    assert!(stdout.is_empty());
    assert!(stderr.contains("bento-echo"));
}
