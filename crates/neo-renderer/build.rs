use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

// Blit shaders, compiled to OUT_DIR/spirv/<name>.spv
const SHADERS: [(&str, &str); 2] = [
    ("blit.vert.glsl", "vertex"),
    ("blit.frag.glsl", "fragment"),
];

fn main() {
    let dest = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let spirv_dir = Path::new(&dest).join("spirv");
    fs::create_dir_all(&spirv_dir).expect("create spirv output directory");

    let shader_dir = Path::new("shaders");
    let glslc = find_glslc();
    match &glslc {
        Some(path) => println!("cargo:warning=Using glslc: {}", path.display()),
        None => println!(
            "cargo:warning=glslc not found; blit shaders not compiled. \
             Install the Vulkan SDK or put glslc on PATH to enable the Vulkan blit."
        ),
    }

    for (filename, stage) in SHADERS {
        let src_path = shader_dir.join(filename);
        let spv_path = spirv_dir.join(filename.replace(".glsl", ".spv"));
        println!("cargo:rerun-if-changed=shaders/{filename}");

        let compiled = match &glslc {
            Some(glslc) => compile_shader(glslc, &src_path, &spv_path, stage, filename),
            None => false,
        };
        if !compiled {
            // empty blob; the renderer reports a shader error when it needs it
            fs::write(&spv_path, b"").expect("write placeholder spirv");
        }
    }
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
}

/// Compile a single shader file to SPIR-V.
fn compile_shader(glslc: &Path, src_path: &Path, spv_path: &Path, stage: &str, filename: &str) -> bool {
    let output = Command::new(glslc)
        .arg(format!("-fshader-stage={stage}"))
        .args(["--target-env=vulkan1.3", "-O", "-o"])
        .arg(spv_path)
        .arg(src_path)
        .output();

    match output {
        Ok(result) if result.status.success() => {
            let stderr = String::from_utf8_lossy(&result.stderr);
            if !stderr.is_empty() {
                println!("cargo:warning=glslc {filename}: {stderr}");
            }
            true
        }
        Ok(result) => {
            let stderr = String::from_utf8_lossy(&result.stderr);
            println!("cargo:warning=glslc FAILED {filename}: {stderr}");
            false
        }
        Err(e) => {
            println!("cargo:warning=glslc: failed to run for {filename}: {e}");
            false
        }
    }
}

/// Find glslc binary: check PATH, then VULKAN_SDK/bin/
fn find_glslc() -> Option<PathBuf> {
    if let Ok(output) = Command::new("glslc").arg("--version").output() {
        if output.status.success() {
            return Some(PathBuf::from("glslc"));
        }
    }

    if let Ok(sdk) = env::var("VULKAN_SDK") {
        for candidate in [
            PathBuf::from(&sdk).join("bin").join("glslc"),
            PathBuf::from(&sdk).join("Bin").join("glslc.exe"),
        ] {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}
