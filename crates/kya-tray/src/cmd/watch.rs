use kya_core::config::TrayConfig;

pub fn run(config: &TrayConfig) -> anyhow::Result<()> {
    for w in config.validate() {
        tracing::warn!(level = ?w.level, "config: {}", w.message);
    }
    let rt = super::runtime()?;
    rt.block_on(async {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl-C; stopping");
            }
        };
        kya_core::tray::watch(config, shutdown).await
    })?;
    Ok(())
}
