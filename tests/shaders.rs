//! The bundled shaders must compile and fit the fixed interface.

use prism::shader::{compile_fragment, link_interface, ShaderSource};
use std::fs;
use std::path::Path;

#[test]
fn test_bundled_shaders_link() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders");
    let mut checked = 0;
    for entry in fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        let text = fs::read_to_string(&path).unwrap();
        let source = ShaderSource::from_path(&path, text);
        let compiled = compile_fragment(&source).unwrap_or_else(|e| panic!("{:?}: {}", path, e));
        link_interface(&compiled).unwrap_or_else(|e| panic!("{:?}: {}", path, e));
        checked += 1;
    }
    assert!(checked >= 3);
}

#[test]
fn test_highlight_shader_reads_detections() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders");
    let path = dir.join("detect_highlight.frag");
    let source = ShaderSource::from_path(&path, fs::read_to_string(&path).unwrap());
    let bindings = link_interface(&compile_fragment(&source).unwrap()).unwrap();
    assert!(bindings.detections && bindings.frame_uniforms && bindings.video);
}
