// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use fluid_backdrop::programs::SHADER_SOURCE;
use fluid_backdrop::Program;

fn parse() -> naga::Module {
    match naga::front::wgsl::parse_str(SHADER_SOURCE) {
        Ok(module) => module,
        Err(e) => panic!("Failed to parse fluid.wgsl:\n{}", e.emit_to_string(SHADER_SOURCE)),
    }
}

#[test]
fn fluid_programs_validate() {
    let module = parse();
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    if let Err(e) = validator.validate(&module) {
        panic!("Failed to validate fluid.wgsl:\n{:?}", e);
    }
}

#[test]
fn every_program_has_a_fragment_entry_point() {
    let module = parse();
    let fragment: Vec<&str> = module
        .entry_points
        .iter()
        .filter(|ep| ep.stage == naga::ShaderStage::Fragment)
        .map(|ep| ep.name.as_str())
        .collect();
    for program in Program::ALL {
        assert!(fragment.contains(&program.entry_point()), "missing {}", program.entry_point());
    }
    assert!(module
        .entry_points
        .iter()
        .any(|ep| ep.stage == naga::ShaderStage::Vertex && ep.name == "vs_main"));
}

#[test]
fn uniform_block_matches_host_layout() {
    let module = parse();
    let (_, ty) = module
        .types
        .iter()
        .find(|(_, ty)| ty.name.as_deref() == Some("PassUniforms"))
        .expect("PassUniforms struct");
    let naga::TypeInner::Struct { ref members, span } = ty.inner else {
        panic!("PassUniforms is not a struct");
    };
    assert_eq!(span as usize, std::mem::size_of::<fluid_backdrop::backend::PassUniforms>());
    let offsets: Vec<u32> = members.iter().map(|m| m.offset).collect();
    assert_eq!(offsets, vec![0, 8, 16, 32, 40, 44, 48, 52, 56]);
}
