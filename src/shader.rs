use std::fmt;

use log::warn;
use naga::front::glsl;
use thiserror::Error;

use crate::platform::{
    AttribFormat, Attribute, FetchShader, PixelShader, Platform, VertexShader,
};

/// Largest diagnostic a compiler may hand back, in bytes.
pub const INFO_LOG_CAPACITY: usize = 1024;

/// Compiler diagnostic, truncated to [`INFO_LOG_CAPACITY`] bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoLog(String);

impl InfoLog {
    pub fn new(message: &str) -> Self {
        let mut end = message.len().min(INFO_LOG_CAPACITY);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        InfoLog(message[..end].to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InfoLog {
    fn from(message: &str) -> Self {
        InfoLog::new(message)
    }
}

impl From<String> for InfoLog {
    fn from(message: String) -> Self {
        InfoLog::new(&message)
    }
}

impl fmt::Display for InfoLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Pixel => "pixel",
        })
    }
}

#[derive(Debug, Error)]
#[error("Failed to compile {stage} shader. Infolog: {log}")]
pub struct ShaderError {
    pub stage: ShaderStage,
    pub log: InfoLog,
}

/// A compiled vertex/pixel pair and the attribute fetch built for it.
#[derive(Debug)]
pub struct ShaderGroup {
    pub vertex_shader: VertexShader,
    pub pixel_shader: PixelShader,
    pub attributes: Vec<Attribute>,
    pub fetch_shader: Option<FetchShader>,
}

impl ShaderGroup {
    /// Compiles both stages. Either stage failing fails the whole group.
    pub fn compile<P: Platform>(
        platform: &mut P,
        vertex_source: &str,
        pixel_source: &str,
    ) -> Result<Box<ShaderGroup>, ShaderError> {
        let vertex_shader =
            platform
                .compile_vertex_shader(vertex_source)
                .map_err(|log| ShaderError {
                    stage: ShaderStage::Vertex,
                    log,
                })?;
        let pixel_shader = platform
            .compile_pixel_shader(pixel_source)
            .map_err(|log| ShaderError {
                stage: ShaderStage::Pixel,
                log,
            })?;

        Ok(Box::new(ShaderGroup {
            vertex_shader,
            pixel_shader,
            attributes: Vec::new(),
            fetch_shader: None,
        }))
    }

    /// Registers the vertex input `name` as fed from stream `buffer`.
    ///
    /// Returns `false` and leaves the group untouched when the vertex shader
    /// declares no such input.
    pub fn init_attribute<P: Platform>(
        &mut self,
        platform: &P,
        name: &str,
        buffer: u32,
        offset: u32,
        format: AttribFormat,
    ) -> bool {
        match platform.attribute_location(self.vertex_shader, name) {
            Some(location) => {
                self.attributes.push(Attribute {
                    name: name.to_owned(),
                    location,
                    buffer,
                    offset,
                    format,
                });
                true
            }
            None => {
                warn!("vertex shader declares no attribute named {:?}", name);
                false
            }
        }
    }

    pub fn init_fetch_shader<P: Platform>(&mut self, platform: &mut P) {
        self.fetch_shader = Some(platform.create_fetch_shader(&self.attributes));
    }
}

/// A located vertex input of a compiled shader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderInput {
    pub name: String,
    pub location: u32,
}

/// Parses vertex GLSL and lists the inputs of its entry point, ordered by
/// location. Parse errors come back as an info log.
pub fn reflect_inputs(source: &str) -> Result<Vec<ShaderInput>, InfoLog> {
    let options = glsl::Options::from(naga::ShaderStage::Vertex);
    let module = glsl::Frontend::default()
        .parse(&options, source)
        .map_err(|err| {
            let messages: Vec<String> = err
                .iter()
                .map(|error| error.kind.to_string())
                .collect();
            InfoLog::from(messages.join("\n"))
        })?;

    let entry_point = module
        .entry_points
        .iter()
        .find(|entry_point| entry_point.stage == naga::ShaderStage::Vertex)
        .ok_or_else(|| InfoLog::from("no vertex entry point"))?;

    let mut inputs: Vec<ShaderInput> = entry_point
        .function
        .arguments
        .iter()
        .filter_map(|argument| match (&argument.name, &argument.binding) {
            (Some(name), Some(naga::Binding::Location { location, .. })) => Some(ShaderInput {
                name: name.clone(),
                location: *location,
            }),
            _ => None,
        })
        .collect();
    inputs.sort_by_key(|input| input.location);
    Ok(inputs)
}
