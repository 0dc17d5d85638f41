// build.rs
// Compiles the GLSL shaders in `shaders/` to SPIR-V under `<workspace>/target/shaders`

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_EXTENSIONS: [&str; 3] = ["vert", "frag", "comp"];

/// Compile every shader in `shader_dir`, returning how many were rebuilt
fn compile_shaders(shader_dir: &Path, target_dir: &Path, glslc: &str) -> usize {
    let shader_files = match std::fs::read_dir(shader_dir) {
        Ok(files) => files,
        Err(_) => {
            eprintln!("info: No shader directory found at: {:?}", shader_dir);
            return 0;
        }
    };

    let mut compiled_count = 0;
    for entry in shader_files {
        let path = match entry {
            Ok(e) => e.path(),
            Err(e) => {
                eprintln!("warning: Error reading shader directory entry: {}", e);
                continue;
            }
        };

        let is_shader = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| SHADER_EXTENSIONS.contains(&ext));
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !is_shader {
            continue;
        }

        // quad.vert -> quad.vert.spv, so stages sharing a stem do not collide
        let out_file = target_dir.join(format!("{}.spv", file_name));
        let needs_compile = match (std::fs::metadata(&path), std::fs::metadata(&out_file)) {
            (Ok(src), Ok(dst)) => match (src.modified(), dst.modified()) {
                (Ok(src_time), Ok(dst_time)) => src_time > dst_time,
                _ => true,
            },
            _ => true,
        };
        if !needs_compile {
            eprintln!("info: Shader {} is up to date", file_name);
            continue;
        }

        let status = Command::new(glslc)
            .arg("--target-env=vulkan1.3")
            .arg(&path)
            .arg("-o")
            .arg(&out_file)
            .status();

        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {} -> {:?}", file_name, out_file);
                compiled_count += 1;
            }
            Ok(s) => {
                eprintln!("error: glslc failed for {:?} with exit code: {}", path, s.code().unwrap_or(-1));
                panic!("Shader compilation failed");
            }
            Err(e) => {
                eprintln!("error: Failed to run glslc for {:?}: {}", path, e);
                panic!("Failed to execute shader compiler");
            }
        }
    }
    compiled_count
}

fn main() {
    println!("cargo:rerun-if-changed=shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Ok(vulkan_sdk) = env::var("VULKAN_SDK") else {
        println!("cargo:warning=VULKAN_SDK not set, shader compilation skipped");
        return;
    };

    let glslc = if cfg!(target_os = "windows") {
        format!("{}\\Bin\\glslc.exe", vulkan_sdk)
    } else {
        format!("{}/bin/glslc", vulkan_sdk)
    };
    if !Path::new(&glslc).exists() {
        println!("cargo:warning=glslc not found at {}, shader compilation skipped", glslc);
        return;
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()));
    let shader_dir = manifest_dir.join("shaders");
    let target_dir = manifest_dir.join("../../target/shaders");
    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        println!("cargo:warning=Failed to create {:?}: {}", target_dir, e);
        return;
    }

    let compiled_count = compile_shaders(&shader_dir, &target_dir, &glslc);
    if compiled_count > 0 {
        eprintln!("info: Successfully compiled {} shader(s)", compiled_count);
    } else {
        eprintln!("info: All shaders are up to date");
    }
}
