use dash_shell::Interpreter;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Diagnostics share the terminal with the prompt, so stay quiet unless asked.
    let filter = EnvFilter::try_from_env("DASH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    Interpreter::default().repl()
}
