//! Reference driver: sends its `call` text back, then echoes every input record
//! until it receives `stop` or its input closes.

use bentoapi::Api;

fn run() -> bentoapi::Result<()> {
    let payload = bentoapi::payload()?;
    let mut api = Api::stdio()?;

    api.send(payload.call)?;
    while let Some(data) = api.recv()? {
        if data == b"stop" {
            break;
        }
        api.send(data)?;
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("bento-echo: {e}");
        std::process::exit(1);
    }
}
