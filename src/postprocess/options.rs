use std::collections::HashMap;

use glam::Vec4;

use crate::engine::{AlphaMode, SamplingMode, ScaleMode, TextureType};

/// How a post-process derives its output size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PostProcessSize {
    /// Fraction of the source texture, or of the render size when there is none.
    Ratio(f32),
    Fixed { width: u32, height: u32 },
}

impl Default for PostProcessSize {
    fn default() -> Self {
        PostProcessSize::Ratio(1.0)
    }
}

/// Construction options of a [`PostProcess`](super::PostProcess).
#[derive(Clone, Debug)]
pub struct PostProcessOptions {
    pub size: PostProcessSize,
    pub sampling_mode: SamplingMode,
    /// Keep two output textures so the pass can run more than once per frame.
    pub reusable: bool,
    pub texture_type: TextureType,
    /// Defer the first compilation until [`update_effect`](super::PostProcess::update_effect).
    pub block_compilation: bool,
    pub defines: Vec<String>,
    pub uniforms: Vec<String>,
    pub samplers: Vec<String>,
    pub index_parameters: HashMap<String, u32>,
    pub alpha_mode: AlphaMode,
    pub always_force_pot: bool,
    pub scale_mode: ScaleMode,
    pub auto_clear: bool,
    pub clear_color: Vec4,
}

impl Default for PostProcessOptions {
    fn default() -> Self {
        Self {
            size: PostProcessSize::default(),
            sampling_mode: SamplingMode::Nearest,
            reusable: false,
            texture_type: TextureType::UnsignedByte,
            block_compilation: false,
            defines: Vec::new(),
            uniforms: Vec::new(),
            samplers: Vec::new(),
            index_parameters: HashMap::new(),
            alpha_mode: AlphaMode::Disabled,
            always_force_pot: false,
            scale_mode: ScaleMode::Floor,
            auto_clear: true,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}

impl PostProcessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ratio(mut self, ratio: f32) -> Self {
        self.size = PostProcessSize::Ratio(ratio);
        self
    }

    pub fn fixed_size(mut self, width: u32, height: u32) -> Self {
        self.size = PostProcessSize::Fixed { width, height };
        self
    }

    pub fn sampling_mode(mut self, mode: SamplingMode) -> Self {
        self.sampling_mode = mode;
        self
    }

    pub fn reusable(mut self, reusable: bool) -> Self {
        self.reusable = reusable;
        self
    }

    pub fn texture_type(mut self, texture_type: TextureType) -> Self {
        self.texture_type = texture_type;
        self
    }

    pub fn block_compilation(mut self, block: bool) -> Self {
        self.block_compilation = block;
        self
    }

    pub fn define(mut self, define: impl Into<String>) -> Self {
        self.defines.push(define.into());
        self
    }

    pub fn uniforms<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uniforms.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn samplers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.samplers.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn index_parameter(mut self, name: impl Into<String>, value: u32) -> Self {
        self.index_parameters.insert(name.into(), value);
        self
    }

    pub fn alpha_mode(mut self, mode: AlphaMode) -> Self {
        self.alpha_mode = mode;
        self
    }

    pub fn always_force_pot(mut self, scale_mode: ScaleMode) -> Self {
        self.always_force_pot = true;
        self.scale_mode = scale_mode;
        self
    }

    pub fn auto_clear(mut self, enabled: bool) -> Self {
        self.auto_clear = enabled;
        self
    }

    pub fn clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }
}
