use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::process::{Command, Output};

use image::{DynamicImage, ImageFormat, RgbaImage};
use tempfile::TempDir;

fn shaderstack(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shaderstack"))
        .env("SHADERSTACK_CONFIG_DIR", root.join("config"))
        .env("SHADERSTACK_CACHE_DIR", root.join("cache"))
        .env_remove("SHADERSTACK_CONFIG")
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run shaderstack")
}

fn gradient_data_url() -> String {
    let image = RgbaImage::from_fn(16, 1, |x, _| image::Rgba([(x * 16) as u8, 0, 255, 255]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    curves::encode_data_url(&bytes)
}

#[test]
fn render_writes_a_png_of_the_requested_size() {
    let root = TempDir::new().unwrap();
    let output = root.path().join("frames/still.png");
    let result = shaderstack(
        root.path(),
        &[
            "render",
            "--offline",
            "--size",
            "48x32",
            "--enable",
            "noise",
            "--enable",
            "sdf",
            "--enable",
            "circle",
            "--enable",
            "ascii",
            "--time",
            "2.5",
            "--output",
            output.to_str().unwrap(),
        ],
    );
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));

    let frame = image::open(&output).unwrap();
    assert_eq!((frame.width(), frame.height()), (48, 32));
}

#[test]
fn render_uses_cached_curves_offline() {
    let root = TempDir::new().unwrap();
    let store = root.path().join("cache/curves");
    fs::create_dir_all(&store).unwrap();
    fs::write(store.join("curve_12"), gradient_data_url()).unwrap();

    let output = root.path().join("curve.png");
    let result = shaderstack(
        root.path(),
        &[
            "render",
            "--offline",
            "--size",
            "16x16",
            "--enable",
            "noise",
            "--curve-id",
            "12",
            "--settle",
            "5s",
            "--output",
            output.to_str().unwrap(),
        ],
    );
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));
    assert!(output.exists());
}

#[test]
fn cache_list_and_clear() {
    let root = TempDir::new().unwrap();
    let store = root.path().join("cache/curves");
    fs::create_dir_all(&store).unwrap();
    fs::write(store.join("curve_7"), gradient_data_url()).unwrap();
    fs::write(store.join("curve_3"), gradient_data_url()).unwrap();

    let listed = shaderstack(root.path(), &["cache", "list"]);
    assert!(listed.status.success());
    let stdout = String::from_utf8_lossy(&listed.stdout);
    assert!(stdout.contains("2 cached curves"), "{stdout}");
    let three = stdout.find("  3").unwrap();
    let seven = stdout.find("  7").unwrap();
    assert!(three < seven);

    let cleared = shaderstack(root.path(), &["cache", "clear"]);
    assert!(cleared.status.success());
    assert!(!store.join("curve_7").exists());
    assert!(!store.join("curve_3").exists());

    let listed = shaderstack(root.path(), &["cache", "list"]);
    assert!(String::from_utf8_lossy(&listed.stdout).contains("No cached curves"));
}

#[test]
fn cache_where_reports_overridden_directories() {
    let root = TempDir::new().unwrap();
    let result = shaderstack(root.path(), &["cache", "where"]);
    assert!(result.status.success());
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains(&root.path().join("config/config.toml").display().to_string()));
    assert!(stdout.contains(&root.path().join("cache/curves").display().to_string()));
}

#[test]
fn invalid_config_is_rejected() {
    let root = TempDir::new().unwrap();
    let config = root.path().join("config");
    fs::create_dir_all(&config).unwrap();
    fs::write(config.join("config.toml"), "version = 2\n").unwrap();

    let output = root.path().join("never.png");
    let result = shaderstack(
        root.path(),
        &["render", "--offline", "--output", output.to_str().unwrap()],
    );
    assert!(!result.status.success());
    assert!(!output.exists());
}
