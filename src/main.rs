use clap::Parser;
use eframe::egui;

use lumina::app::LuminaApp;
use lumina::cli::{self, CliArgs};
use lumina::logger;

fn main() -> Result<(), eframe::Error> {
    // -- CLI / headless mode ---------------------------------------------
    if CliArgs::is_cli_mode() {
        let args = CliArgs::parse();
        logger::init_cli(args.verbose);
        let code = cli::run(args);
        std::process::exit(if code == std::process::ExitCode::SUCCESS { 0 } else { 1 });
    }

    // -- GUI mode ---------------------------------------------------------

    // Session log (overwrites the previous session's)
    logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_min_inner_size([800.0, 500.0])
            .with_title("Lumina"),
        ..Default::default()
    };

    eframe::run_native("Lumina", options, Box::new(|cc| Box::new(LuminaApp::new(cc))))
}
