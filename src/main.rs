use std::path::PathBuf;

use eframe::egui;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;
mod binding;
mod codec;
mod config;
mod error;
mod host;
mod resolve;
mod scene;
mod serializer;
mod style_state;
mod tools;
mod viewport;

use app::RedlineApp;
use host::MemoryBase;

fn current_user() -> String {
    std::env::var("REDLINE_USER")
        .or_else(|_| std::env::var("USER"))
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "anonymous".to_string())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("redline=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("Usage: redline [image.png|jpg] [workspace.json]");
        std::process::exit(0);
    }

    let image_path = args.get(1).map(PathBuf::from);
    if let Some(path) = &image_path {
        if !path.exists() {
            eprintln!("File not found: {}", path.display());
            std::process::exit(1);
        }
    }

    let workspace_path = args.get(2).map(PathBuf::from).unwrap_or_else(|| {
        image_path
            .as_deref()
            .and_then(|p| p.parent())
            .unwrap_or_else(|| std::path::Path::new("."))
            .join("redline-workspace.json")
    });

    let user = current_user();
    let store = if workspace_path.exists() {
        match MemoryBase::load(&workspace_path, &user) {
            Ok(store) => store,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    } else {
        info!(workspace = %workspace_path.display(), "bootstrapping new workspace");
        MemoryBase::bootstrap(&user)
    };

    let title = match image_path.as_deref().and_then(|p| p.file_name()) {
        Some(name) => format!("redline — {}", name.to_string_lossy()),
        None => "redline".to_string(),
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title(&title),
        ..Default::default()
    };

    eframe::run_native(
        &title,
        options,
        Box::new(move |_cc| Ok(Box::new(RedlineApp::new(workspace_path, store, image_path)))),
    )
    .expect("Failed to run eframe");
}
