use glsl_to_spirv::ShaderType;
use gfx_hal::{prelude::*, pso, Backend};
use log::debug;
use std::io::{Cursor, Read};

use crate::shader::{InfoLog, ShaderStage};

/// Compiles GLSL source for `stage` into a shader module. Every failure on
/// the way ends up in the returned info log.
pub fn compile<B: Backend>(
    device: &B::Device,
    source: &str,
    stage: ShaderStage,
) -> Result<B::ShaderModule, InfoLog> {
    let ty = match stage {
        ShaderStage::Vertex => ShaderType::Vertex,
        ShaderStage::Pixel => ShaderType::Fragment,
    };
    let mut file = glsl_to_spirv::compile(source, ty)?;

    let mut buf = vec![];
    file.read_to_end(&mut buf)
        .map_err(|err| InfoLog::from(err.to_string()))?;
    let spirv = pso::read_spirv(Cursor::new(&buf[..]))
        .map_err(|err| InfoLog::from(err.to_string()))?;

    let module = unsafe { device.create_shader_module(&spirv) }
        .map_err(|err| InfoLog::from(format!("{:?}", err)))?;
    debug!("compiled {} shader ({} words)", stage, spirv.len());
    Ok(module)
}
