//! Blend modes and generation of the composition fragment shader.
//!
//! Layers are folded front to back in declaration order: `cur` starts as
//! transparent black, and for every layer `i` the generated shader samples
//! `layer{i}` into `next`, evaluates that layer's blend formula into `blended`
//! and stores the result back into `cur`. Layer 0 is therefore blended
//! against the transparent seed as well, which makes `Multiply` on the first
//! layer produce transparent black.

use std::fmt::{self, Write as _};

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::error::TemplateError;

pub const TEXTURE_DECLARATIONS_TOKEN: &str = "$TEXTURE_DECLARATIONS";
pub const COMPOSITION_STATEMENTS_TOKEN: &str = "$COMPOSITION_STATEMENTS";

/// Template shipped with the crate.
pub const DEFAULT_COMPOSITION_TEMPLATE: &str = include_str!("../../shaders/compose.frag.template");

/// How a layer combines with everything composited before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlendMode {
    /// Porter-Duff source-over.
    #[default]
    Normal,
    /// Component-wise sum, clamped to [0, 1].
    Add,
    /// Component-wise product.
    Multiply,
}

impl BlendMode {
    /// GLSL statements computing `blended` from `cur` and `next`.
    pub fn glsl(self) -> &'static str {
        match self {
            BlendMode::Normal => {
                "blended.a = next.a + cur.a * (1.0 - next.a);\n    \
                 blended.rgb = blended.a > 0.0 \
                 ? (next.rgb * next.a + cur.rgb * cur.a * (1.0 - next.a)) / blended.a \
                 : vec3(0.0);"
            }
            BlendMode::Add => "blended = clamp(cur + next, 0.0, 1.0);",
            BlendMode::Multiply => "blended = cur * next;",
        }
    }

    /// CPU evaluation of the same formula as [`BlendMode::glsl`].
    pub fn apply(self, cur: Vec4, next: Vec4) -> Vec4 {
        match self {
            BlendMode::Normal => {
                let alpha = next.w + cur.w * (1.0 - next.w);
                if alpha <= 0.0 {
                    return Vec4::ZERO;
                }
                let rgb =
                    (next.truncate() * next.w + cur.truncate() * cur.w * (1.0 - next.w)) / alpha;
                rgb.extend(alpha)
            }
            BlendMode::Add => (cur + next).clamp(Vec4::ZERO, Vec4::ONE),
            BlendMode::Multiply => cur * next,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BlendMode::Normal => "NORMAL",
            BlendMode::Add => "ADD",
            BlendMode::Multiply => "MULTIPLY",
        }
    }

    pub fn all() -> &'static [BlendMode] {
        &[BlendMode::Normal, BlendMode::Add, BlendMode::Multiply]
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Folds `(mode, color)` pairs the way the generated shader does for one pixel.
pub fn composite(layers: &[(BlendMode, Vec4)]) -> Vec4 {
    layers
        .iter()
        .fold(Vec4::ZERO, |cur, (mode, next)| mode.apply(cur, *next))
}

/// A validated composition template: each token occurs exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionTemplate {
    source: String,
}

impl CompositionTemplate {
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        for token in [TEXTURE_DECLARATIONS_TOKEN, COMPOSITION_STATEMENTS_TOKEN] {
            match source.matches(token).count() {
                0 => return Err(TemplateError::MissingToken(token)),
                1 => {}
                count => return Err(TemplateError::DuplicateToken { token, count }),
            }
        }
        Ok(Self { source })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Emits the fragment shader for one layer per blend mode.
    pub fn generate(&self, blend_modes: &[BlendMode]) -> String {
        let mut declarations = String::new();
        let mut statements = String::new();
        for (index, mode) in blend_modes.iter().enumerate() {
            if index > 0 {
                declarations.push('\n');
                statements.push_str("\n\n    ");
            }
            let _ = write!(declarations, "uniform sampler2D {};", sampler_name(index));
            let _ = write!(
                statements,
                "// layer {index}: {mode}\n    next = texture2D({}, position_norm);\n    {}\n    cur = blended;",
                sampler_name(index),
                mode.glsl(),
            );
        }

        self.source
            .replacen(TEXTURE_DECLARATIONS_TOKEN, &declarations, 1)
            .replacen(COMPOSITION_STATEMENTS_TOKEN, &statements, 1)
    }
}

impl Default for CompositionTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_COMPOSITION_TEMPLATE.to_string(),
        }
    }
}

/// Name of the sampler uniform bound to layer `index`.
pub fn sampler_name(index: usize) -> String {
    format!("layer{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Vec4 = Vec4::new(1.0, 0.0, 0.0, 1.0);
    const BLUE: Vec4 = Vec4::new(0.0, 0.0, 1.0, 1.0);
    const WHITE: Vec4 = Vec4::ONE;

    #[test]
    fn normal_top_layer_occludes_opaque_bottom() {
        let out = composite(&[(BlendMode::Normal, RED), (BlendMode::Normal, BLUE)]);
        assert!(out.abs_diff_eq(BLUE, 1e-6));
    }

    #[test]
    fn add_of_red_and_blue_is_magenta() {
        let out = composite(&[(BlendMode::Normal, RED), (BlendMode::Add, BLUE)]);
        assert!(out.abs_diff_eq(Vec4::new(1.0, 0.0, 1.0, 1.0), 1e-6));
    }

    #[test]
    fn add_clamps() {
        let out = BlendMode::Add.apply(Vec4::splat(0.75), Vec4::splat(0.5));
        assert_eq!(out, Vec4::ONE);
    }

    #[test]
    fn multiply_by_white_is_identity() {
        let color = Vec4::new(0.2, 0.4, 0.6, 0.8);
        let out = composite(&[(BlendMode::Normal, WHITE), (BlendMode::Multiply, color)]);
        assert!(out.abs_diff_eq(color, 1e-6));
    }

    #[test]
    fn multiply_on_first_layer_is_transparent() {
        assert_eq!(composite(&[(BlendMode::Multiply, RED)]), Vec4::ZERO);
    }

    #[test]
    fn normal_with_zero_alpha_is_transparent_black() {
        let out = BlendMode::Normal.apply(Vec4::ZERO, Vec4::new(0.7, 0.3, 0.1, 0.0));
        assert_eq!(out, Vec4::ZERO);
        assert!(out.is_finite());
    }

    #[test]
    fn normal_blends_translucent_layer() {
        let half_blue = Vec4::new(0.0, 0.0, 1.0, 0.5);
        let out = composite(&[(BlendMode::Normal, RED), (BlendMode::Normal, half_blue)]);
        assert!(out.abs_diff_eq(Vec4::new(0.5, 0.0, 0.5, 1.0), 1e-6));
    }

    #[test]
    fn normal_is_source_over_for_translucent_stacks() {
        let half_red = Vec4::new(1.0, 0.0, 0.0, 0.5);
        let half_blue = Vec4::new(0.0, 0.0, 1.0, 0.5);
        let out = BlendMode::Normal.apply(half_red, half_blue);
        assert!(out.abs_diff_eq(Vec4::new(1.0 / 3.0, 0.0, 2.0 / 3.0, 0.75), 1e-6));
    }

    #[test]
    fn generates_one_sampler_and_statement_block_per_layer() {
        let template = CompositionTemplate::default();
        let source = template.generate(&[BlendMode::Normal, BlendMode::Add, BlendMode::Multiply]);

        assert!(!source.contains('$'));
        for index in 0..3 {
            assert_eq!(
                source.matches(&format!("uniform sampler2D layer{index};")).count(),
                1
            );
            assert_eq!(
                source
                    .matches(&format!("next = texture2D(layer{index}, position_norm);"))
                    .count(),
                1
            );
        }
        assert_eq!(source.matches("cur = blended;").count(), 3);

        let add = source.find("clamp(cur + next").unwrap();
        let multiply = source.find("blended = cur * next;").unwrap();
        assert!(add < multiply);
    }

    #[test]
    fn rejects_missing_and_repeated_tokens() {
        assert_eq!(
            CompositionTemplate::parse("void main() { $COMPOSITION_STATEMENTS }"),
            Err(TemplateError::MissingToken(TEXTURE_DECLARATIONS_TOKEN))
        );
        assert_eq!(
            CompositionTemplate::parse(
                "$TEXTURE_DECLARATIONS $TEXTURE_DECLARATIONS $COMPOSITION_STATEMENTS"
            ),
            Err(TemplateError::DuplicateToken {
                token: TEXTURE_DECLARATIONS_TOKEN,
                count: 2
            })
        );
        assert!(CompositionTemplate::parse(DEFAULT_COMPOSITION_TEMPLATE).is_ok());
    }

    #[test]
    fn blend_modes_use_screaming_case_in_json() {
        let json = serde_json::to_string(&BlendMode::Multiply).unwrap();
        assert_eq!(json, "\"MULTIPLY\"");
        let parsed: BlendMode = serde_json::from_str("\"ADD\"").unwrap();
        assert_eq!(parsed, BlendMode::Add);
    }
}
