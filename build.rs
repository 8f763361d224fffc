// Build script to compile GLSL shaders to SPIR-V
//
// The program loads the .spv files from the working directory at startup,
// so they land next to their sources in shaders/.

use std::path::Path;
use std::process::Command;

fn main() {
    compile_shader("shaders/shader.vert", "shaders/vert.spv");
    compile_shader("shaders/shader.frag", "shaders/frag.spv");
}

fn compile_shader(input: &str, output: &str) {
    println!("cargo:rerun-if-changed={}", input);
    // A missing output also triggers a rerun
    println!("cargo:rerun-if-changed={}", output);

    let input_path = Path::new(input);
    let output_path = Path::new(output);

    // glslc ships with the Vulkan SDK
    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input, output);
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} was not compiled", e, input);
            println!("cargo:warning=compile manually: glslc {} -o {}", input, output);
        }
    }
}
