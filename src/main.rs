use catalog_sync::app::CatalogSyncApp;
use env_logger::Env;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let search = std::env::args().nth(1).filter(|arg| !arg.trim().is_empty());
    CatalogSyncApp::new()?.run(search)
}
