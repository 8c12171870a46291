use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    // Vertex shader: no vertex buffers, the triangle and its UVs are indexed by
    // gl_VertexIndex. Set 0 binding 0 carries the pre-rotation matrix.
    let vs_src = r#"
#version 450
layout(set = 0, binding = 0) uniform UniformBufferObject { mat4 mvp; } ubo;

layout(location = 0) out vec2 vTexCoord;

vec2 positions[3] = vec2[](
    vec2( 0.0,  0.577),
    vec2(-0.5, -0.289),
    vec2( 0.5, -0.289)
);

vec2 texCoords[3] = vec2[](
    vec2(0.5, 1.0),
    vec2(0.0, 0.0),
    vec2(1.0, 0.0)
);

void main() {
    gl_Position = ubo.mvp * vec4(positions[gl_VertexIndex], 0.0, 1.0);
    vTexCoord = texCoords[gl_VertexIndex];
}
"#;

    // Fragment shader: plain texture lookup, set 0 binding 1.
    let fs_src = r#"
#version 450
layout(location = 0) in vec2 vTexCoord;
layout(set = 0, binding = 1) uniform sampler2D samp;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = texture(samp, vTexCoord);
}
"#;

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "shader.vert",
            "main",
            Some(&opts),
        )
        .expect("compile shader.vert");
    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "shader.frag",
            "main",
            Some(&opts),
        )
        .expect("compile shader.frag");

    fs::write(out.join("shader.vert.spv"), vs_spv.as_binary_u8()).expect("write shader.vert.spv");
    fs::write(out.join("shader.frag.spv"), fs_spv.as_binary_u8()).expect("write shader.frag.spv");

    println!("cargo:rerun-if-changed=build.rs");
}
