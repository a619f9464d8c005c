//! Integration tests for the command-line interface: apply, check and list.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ooxml-patcher"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

/// Copy the slide fixture into a scratch package directory.
fn setup_package() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let slides = dir.path().join("ppt/slides");
    fs::create_dir_all(&slides).unwrap();
    let slide = slides.join("slide1.xml");
    fs::copy(fixture("slide1.xml"), &slide).unwrap();
    fs::write(dir.path().join("ppt/presentation.xml"), "<presentation/>").unwrap();
    (dir, slide)
}

fn s(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_apply_help() {
    let output = run(&["apply", "--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Apply patch files to one XML part"));
}

#[test]
fn test_apply_writes_output_file() {
    let (dir, slide) = setup_package();
    let out = dir.path().join("patched.xml");
    let registry = fixture("registry.toml");
    let patches = fixture("patches/20-slide.toml");
    let tokens = fixture("tokens.toml");

    let output = run(&[
        "apply",
        "--registry",
        s(&registry),
        "--patches",
        s(&patches),
        "--part",
        s(&slide),
        "--tokens",
        s(&tokens),
        "--output",
        s(&out),
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.contains("Registry: office-base 1.4.0"));
    assert!(stdout.contains("Summary:"));
    assert!(stdout.contains("4 applied"));
    assert!(stdout.contains("1 skipped"));

    let patched = fs::read_to_string(&out).unwrap();
    assert!(patched.contains("Footer Placeholder 4"));
    assert!(patched.contains("Brand Logo"));
    assert!(!patched.contains("Draft Watermark"));
    assert_eq!(
        fs::read_to_string(&slide).unwrap(),
        fs::read_to_string(fixture("slide1.xml")).unwrap()
    );
}

#[test]
fn test_apply_in_place_is_idempotent() {
    let (_dir, slide) = setup_package();
    let registry = fixture("registry.toml");
    let patches = fixture("patches/20-slide.toml");
    let tokens = fixture("tokens.toml");
    let args = [
        "apply",
        "-r",
        s(&registry),
        "-p",
        s(&patches),
        "--part",
        s(&slide),
        "-t",
        s(&tokens),
    ];

    assert!(run(&args).status.success());
    let first = fs::read_to_string(&slide).unwrap();

    let output = run(&args);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("0 applied"));
    assert!(stdout.contains("5 already applied"));
    assert_eq!(fs::read_to_string(&slide).unwrap(), first);
}

#[test]
fn test_apply_dry_run_leaves_files_alone() {
    let (dir, slide) = setup_package();
    let original = fs::read_to_string(&slide).unwrap();
    let registry = fixture("registry.toml");
    let tokens = fixture("tokens.toml");
    let patch = dir.path().join("part.toml");
    fs::write(
        &patch,
        r#"
[[operations]]
kind = "ensurePart"
part_ref = "brandingData"
fragment_ref = "brandingData"

[[operations]]
kind = "ensureAttr"
target_ref = "slide"
attr = "showMasterSp"
value = "0"
"#,
    )
    .unwrap();

    let output = run(&[
        "apply",
        "--registry",
        s(&registry),
        "--patches",
        s(&patch),
        "--part",
        s(&slide),
        "--tokens",
        s(&tokens),
        "--parts-dir",
        s(dir.path()),
        "--dry-run",
        "--diff",
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.contains("DRY RUN"));
    assert!(stdout.contains("Would apply"));
    assert!(stdout.contains(r#"+<p:sld"#));
    assert_eq!(fs::read_to_string(&slide).unwrap(), original);
    assert!(!dir.path().join("customXml/item1.xml").exists());
}

#[test]
fn test_apply_creates_part_in_package_dir() {
    let (dir, slide) = setup_package();
    let registry = fixture("registry.toml");
    let tokens = fixture("tokens.toml");
    let patch = dir.path().join("part.toml");
    fs::write(
        &patch,
        r#"
[[operations]]
kind = "ensurePart"
part_ref = "brandingData"
fragment_ref = "brandingData"
"#,
    )
    .unwrap();

    let output = run(&[
        "apply",
        "--registry",
        s(&registry),
        "--patches",
        s(&patch),
        "--part",
        s(&slide),
        "--tokens",
        s(&tokens),
        "--parts-dir",
        s(dir.path()),
    ]);
    assert!(output.status.success());
    let created = fs::read_to_string(dir.path().join("customXml/item1.xml")).unwrap();
    assert!(created.contains("<b:palette>1F4E79</b:palette>"));
}

#[test]
fn test_apply_new_parts_need_package_dir() {
    let (dir, slide) = setup_package();
    let original = fs::read_to_string(&slide).unwrap();
    let registry = fixture("registry.toml");
    let tokens = fixture("tokens.toml");
    let patch = dir.path().join("part.toml");
    fs::write(
        &patch,
        r#"
[[operations]]
kind = "ensurePart"
part_ref = "brandingData"
fragment_ref = "brandingData"
"#,
    )
    .unwrap();

    let output = run(&[
        "apply",
        "--registry",
        s(&registry),
        "--patches",
        s(&patch),
        "--part",
        s(&slide),
        "--tokens",
        s(&tokens),
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("uses ensurePart"), "{stderr}");
    assert!(stderr.contains("--parts-dir"));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("Applied"));
    assert_eq!(fs::read_to_string(&slide).unwrap(), original);
    assert!(!dir.path().join("customXml/item1.xml").exists());
}

#[test]
fn test_apply_failure_exits_nonzero() {
    let (dir, slide) = setup_package();
    let original = fs::read_to_string(&slide).unwrap();
    let registry = fixture("registry.toml");
    let patch = dir.path().join("broken.toml");
    fs::write(
        &patch,
        r#"
[[operations]]
kind = "ensureAttr"
target_ref = "slide"
attr = "showMasterSp"
value = "0"

[[operations]]
kind = "set"
target_ref = "shapeNames"
value = "Renamed"
"#,
    )
    .unwrap();

    let output = run(&[
        "apply",
        "--registry",
        s(&registry),
        "--patches",
        s(&patch),
        "--part",
        s(&slide),
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("#1 set [shapeNames]"), "{stderr}");
    assert!(stderr.contains("matched 2 nodes"));
    assert_eq!(fs::read_to_string(&slide).unwrap(), original);
}

#[test]
fn test_check_reports_registry_and_patches() {
    let registry = fixture("registry.toml");
    let patches = fixture("patches");
    let output = run(&["check", "--registry", s(&registry), "--patches", s(&patches)]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.contains("12 paths, 4 fragments, 1 parts"));
    assert!(stdout.contains("10-theme.toml: 2 operations"));
    assert!(stdout.contains("20-slide.toml: 6 operations"));
    assert!(stdout.contains("2 valid"));
}

#[test]
fn test_check_rejects_unknown_refs() {
    let dir = TempDir::new().unwrap();
    let registry = fixture("registry.toml");
    let patch = dir.path().join("typo.toml");
    fs::write(
        &patch,
        "[[operations]]\nkind = \"remove\"\ntarget_ref = \"draftShapes\"\n",
    )
    .unwrap();

    let output = run(&["check", "--registry", s(&registry), "--patches", s(&patch)]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("draftShapes"), "{stderr}");
}

#[test]
fn test_list_layers() {
    let base = fixture("registry.toml");
    let overlay = fixture("overlay.toml");
    let output = run(&["list", "--registry", s(&base), s(&overlay)]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.contains("Registry: acme 1.4.0"));
    assert!(stdout.contains("accent1ColorAttr = //clrScheme/accent1/srgbClr/@val"));
    assert!(stdout.contains("footerShape"));
    assert!(stdout.contains("brandingData -> /customXml/item1.xml (application/xml)"));
}
