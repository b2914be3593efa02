use glam::Vec4;

use super::RenderLayer;
use crate::gl::{ClearMask, GraphicsContext};
use crate::Result;

/// Fills its target with one color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolidLayer {
    color: Vec4,
}

impl SolidLayer {
    pub fn new(color: Vec4) -> Self {
        Self { color }
    }

    pub fn color(&self) -> Vec4 {
        self.color
    }

    pub fn set_color(&mut self, color: Vec4) {
        self.color = color;
    }
}

impl RenderLayer for SolidLayer {
    fn render(&mut self, gl: &mut dyn GraphicsContext, _time: f64) -> Result<()> {
        gl.clear_color(self.color);
        gl.clear(ClearMask::COLOR);
        Ok(())
    }
}

/// Adapts a closure into a [`RenderLayer`].
pub struct FnLayer<F> {
    render: F,
}

impl<F> FnLayer<F>
where
    F: FnMut(&mut dyn GraphicsContext, f64) -> Result<()>,
{
    pub fn new(render: F) -> Self {
        Self { render }
    }
}

impl<F> RenderLayer for FnLayer<F>
where
    F: FnMut(&mut dyn GraphicsContext, f64) -> Result<()>,
{
    fn render(&mut self, gl: &mut dyn GraphicsContext, time: f64) -> Result<()> {
        (self.render)(gl, time)
    }
}

impl<F> std::fmt::Debug for FnLayer<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnLayer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::{GlCommand, HeadlessContext};

    #[test]
    fn solid_layer_clears_to_its_color() {
        let mut gl = HeadlessContext::new();
        let color = Vec4::new(0.0, 0.4, 0.0, 1.0);
        SolidLayer::new(color).render(&mut gl, 0.0).unwrap();

        assert_eq!(
            gl.commands(),
            &[GlCommand::ClearColor(color), GlCommand::Clear(ClearMask::COLOR)]
        );
        assert_eq!(gl.screen_fill(), Some(color));
    }

    #[test]
    fn fn_layer_forwards_time() {
        let mut gl = HeadlessContext::new();
        let mut seen = Vec::new();
        {
            let mut layer = FnLayer::new(|gl: &mut dyn GraphicsContext, time: f64| {
                seen.push(time);
                gl.viewport(1, 1);
                Ok(())
            });
            layer.render(&mut gl, 0.25).unwrap();
            layer.render(&mut gl, 0.5).unwrap();
        }
        assert_eq!(seen, vec![0.25, 0.5]);
        assert_eq!(gl.viewports().len(), 2);
    }
}
