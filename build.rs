use std::process::Command;

fn main() {
    // PyO3's build script does the real interpreter detection. This only
    // adds libpython's directory to the search path so the cdylib links
    // against shared-library builds outside the default paths.
    println!("cargo:rerun-if-env-changed=PYO3_PYTHON");
    let python = std::env::var("PYO3_PYTHON").unwrap_or_else(|_| "python3".to_string());

    if let Ok(output) = Command::new(&python).arg("--version").output() {
        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout);
            println!("cargo:warning=Embedding {}", version.trim());
        }
    }

    if let Ok(output) = Command::new(&python)
        .args([
            "-c",
            "import sysconfig; print(sysconfig.get_config_var('LIBDIR'))",
        ])
        .output()
    {
        if output.status.success() {
            let libdir = String::from_utf8_lossy(&output.stdout);
            let libdir = libdir.trim();
            if !libdir.is_empty() && libdir != "None" {
                println!("cargo:rustc-link-search=native={libdir}");
            }
        }
    }
}
