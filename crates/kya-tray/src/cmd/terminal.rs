use kya_core::config::TrayConfig;
use kya_core::escalation::open_in_terminal;
use kya_core::gateway::ActionGateway;

/// Keeps the window up after the command prints.
const HOLD_OPEN: &str = "echo; read -p 'Press Enter to close'";

/// `sudo kya tune` in a terminal window; sudo asks for the password there.
pub fn tune(config: &TrayConfig) -> anyhow::Result<()> {
    let line = ActionGateway::from_config(config).shell_command(&["tune"], Some("sudo"));
    open(config, &line)
}

/// `kya status` in a terminal window that waits for Enter.
pub fn status(config: &TrayConfig) -> anyhow::Result<()> {
    open(config, &status_line(config))
}

fn status_line(config: &TrayConfig) -> String {
    let status = ActionGateway::from_config(config).shell_command(&["status"], None);
    format!("{status}; {HOLD_OPEN}")
}

fn open(config: &TrayConfig, line: &str) -> anyhow::Result<()> {
    let rt = super::runtime()?;
    let opened = rt.block_on(async { open_in_terminal(&config.terminal, line) });
    if !opened {
        anyhow::bail!("could not start {}; run in a terminal: {line}", config.terminal);
    }
    println!("Opened {}: {line}", config.terminal);
    Ok(())
}
