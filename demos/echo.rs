//! Generation-echoing demo server: every accepted connection receives this
//! child's generation id and nothing else. The integration tests drive it
//! through restarts and crashes; the knobs below are all environment
//! variables so one binary covers every scenario.

use std::{env, io::Write, net::SocketAddr, sync::Arc, thread, time::Duration};

fn main() -> Result<(), instar::RunError> {
    env_logger::init();

    let addr: SocketAddr = env::var("ECHO_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:4040".into())
        .parse()
        .expect("ECHO_ADDR must be host:port");
    let exit_code: Option<i32> = env::var("ECHO_EXIT_CODE")
        .ok()
        .map(|c| c.parse().expect("ECHO_EXIT_CODE must be an integer"));
    let ignore_terminate = env::var("ECHO_IGNORE_TERMINATE").is_ok();
    let terminate_timeout_ms: u64 = env::var("ECHO_TERMINATE_TIMEOUT_MS")
        .ok()
        .map(|t| t.parse().expect("ECHO_TERMINATE_TIMEOUT_MS must be an integer"))
        .unwrap_or(5000);
    // sleep this long before answering each request, to keep connections
    // in flight across a restart
    let response_delay = Duration::from_millis(
        env::var("ECHO_RESPONSE_DELAY_MS")
            .ok()
            .map(|d| d.parse().expect("ECHO_RESPONSE_DELAY_MS must be an integer"))
            .unwrap_or(0),
    );
    // generation 1 asks the master for a restart this long after starting
    let restart_after: Option<u64> = env::var("ECHO_RESTART_AFTER_MS")
        .ok()
        .map(|t| t.parse().expect("ECHO_RESTART_AFTER_MS must be an integer"));

    let mut cfg = instar::Config::new(move |mut state: instar::State| {
        if let Some(code) = exit_code {
            std::process::exit(code);
        }
        println!("MASTER_PID={}", nix::unistd::getppid());

        let listeners = state.take_listeners();
        let generation = state.id().to_string();
        let token = state.shutdown_token();
        let state = Arc::new(state);

        if let (Some(delay_ms), "1") = (restart_after, generation.as_str()) {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(delay_ms));
                if let Err(e) = state.request_restart() {
                    log::warn!("restart request failed: {e}");
                }
            });
        }

        let mut workers = Vec::new();
        for listener in listeners {
            let listener = listener.into_tcp().expect("echo only serves tcp");
            listener.set_nonblocking(true)?;
            let token = token.clone();
            let generation = generation.clone();
            workers.push(thread::spawn(move || loop {
                if !ignore_terminate && token.is_cancelled() {
                    return;
                }
                match listener.accept() {
                    Ok((mut conn, _)) => {
                        if !response_delay.is_zero() {
                            thread::sleep(response_delay);
                        }
                        let _ = conn.write_all(generation.as_bytes());
                        let _ = conn.write_all(b"\n");
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(25));
                    }
                    Err(_) => return,
                }
            }));
        }
        for worker in workers {
            let _ = worker.join();
        }
        Ok(())
    });
    cfg.addresses = vec![instar::BindAddr::Tcp(addr)];
    cfg.terminate_timeout = Duration::from_millis(terminate_timeout_ms);
    cfg.debug = true;

    instar::run(cfg)
}
