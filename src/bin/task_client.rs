//! Task client demo: submit a handful of payloads to a running task server.
//!
//! Start `cargo run --bin task_server` first.

use taskring_rs::TaskClient;

const SERVER_HOST: &str = "127.0.0.1";
const SERVER_PORT: u16 = 8080;

fn main() {
    println!("taskring task client -> {SERVER_HOST}:{SERVER_PORT}");
    println!();

    let mut client = TaskClient::new(SERVER_HOST, SERVER_PORT);
    if let Err(err) = client.connect() {
        eprintln!("connect failed: {err}");
        eprintln!("is the task server running? (cargo run --bin task_server)");
        return;
    }

    match client.ping() {
        Ok(true) => println!("ping: server is alive"),
        Ok(false) => println!("ping: unexpected reply"),
        Err(err) => {
            eprintln!("ping failed: {err}");
            return;
        }
    }
    println!();

    let payloads = [
        "hello",
        "a longer payload that takes a bit more time to process",
        "this one will fail",
        "world",
    ];

    for payload in payloads {
        match client.submit(payload) {
            Ok(result) => println!("ok   {payload:?} -> {result}"),
            Err(err) => println!("err  {payload:?} -> {err}"),
        }
    }

    client.disconnect();
    println!();
    println!("done");
}
