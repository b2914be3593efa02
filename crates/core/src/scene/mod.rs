//! Scene graph: a strict tree of objects with relative transforms, drawn
//! through a camera into whichever target is bound.
//!
//! Rendering walks the tree once, keeping a single cumulative matrix. Each
//! node multiplies its forward matrix in before drawing itself and its
//! children, and multiplies its inverse back in afterwards, so the register
//! returns to its starting value without a matrix stack.

mod grid;
mod mesh;

use glam::{Mat4, Vec4};
use tracing::trace;

use crate::camera::{Camera, Projectable};
use crate::gl::{ClearMask, GraphicsContext, ProgramHandle};
use crate::render::RenderLayer;
use crate::{Result, Transform};

pub use grid::{
    GridSettings, LightGrid, GRID_FRAGMENT_SHADER, GRID_PROGRAM_ID, GRID_VERTEX_SHADER,
};
pub use mesh::{MeshData, MeshNode, FALLBACK_TEXTURE_PIXELS, MESH_PROGRAM_ID};

/// Per-frame behaviour of a node. May adjust the node's own transform.
pub trait Updatable {
    fn update(&mut self, time: f64, transform: &mut Transform) -> Result<()>;
}

/// Drawing behaviour of a node.
pub trait Renderable {
    fn render(&mut self, gl: &mut dyn GraphicsContext, ctx: &NodeRenderContext) -> Result<()>;

    /// Frees the GPU objects the content owns.
    fn release(&mut self, _gl: &mut dyn GraphicsContext) {}
}

/// Content that can be attached to a [`SceneObject`].
pub trait NodeContent: Updatable + Renderable {}

impl<T: Updatable + Renderable> NodeContent for T {}

/// What a node sees while it renders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeRenderContext {
    pub time: f64,
    /// Product of every transform from the root down to and including this node.
    pub cumulative: Mat4,
    pub view_projection: Mat4,
    /// The scene's default program, bound at the start of the pass.
    pub program: ProgramHandle,
}

#[derive(Debug, Clone, Copy)]
struct FrameContext {
    time: f64,
    view_projection: Mat4,
    program: ProgramHandle,
}

/// A named node owning its children exclusively.
pub struct SceneObject {
    name: String,
    pub transform: Transform,
    children: Vec<SceneObject>,
    content: Option<Box<dyn NodeContent>>,
}

impl std::fmt::Debug for SceneObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneObject")
            .field("name", &self.name)
            .field("transform", &self.transform)
            .field("children", &self.children)
            .field("has_content", &self.content.is_some())
            .finish()
    }
}

impl SceneObject {
    /// An empty grouping node.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Transform::new(),
            children: Vec::new(),
            content: None,
        }
    }

    pub fn with_content(name: impl Into<String>, content: impl NodeContent + 'static) -> Self {
        Self {
            content: Some(Box::new(content)),
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends `child` and returns it for further configuration.
    pub fn add_child(&mut self, child: SceneObject) -> &mut SceneObject {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn children(&self) -> &[SceneObject] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [SceneObject] {
        &mut self.children
    }

    pub fn content_mut(&mut self) -> Option<&mut (dyn NodeContent + 'static)> {
        self.content.as_deref_mut()
    }

    /// Depth-first search by name, this node included.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut SceneObject> {
        if self.name == name {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_mut(name))
    }

    /// Updates this node, then every child in insertion order.
    pub fn update_tree(&mut self, time: f64) -> Result<()> {
        if let Some(content) = self.content.as_mut() {
            content.update(time, &mut self.transform)?;
        }
        for child in &mut self.children {
            child.update_tree(time)?;
        }
        Ok(())
    }

    /// Releases the content of this node and of every descendant.
    pub fn release_tree(&mut self, gl: &mut dyn GraphicsContext) {
        if let Some(content) = self.content.as_mut() {
            content.release(gl);
        }
        for child in &mut self.children {
            child.release_tree(gl);
        }
    }

    fn render_tree(
        &mut self,
        gl: &mut dyn GraphicsContext,
        frame: &FrameContext,
        cumulative: &mut Mat4,
    ) -> Result<()> {
        let (forward, inverse) = self.transform.matrices();
        *cumulative *= forward;

        if let Some(content) = self.content.as_mut() {
            let ctx = NodeRenderContext {
                time: frame.time,
                cumulative: *cumulative,
                view_projection: frame.view_projection,
                program: frame.program,
            };
            content.render(gl, &ctx)?;
        }
        for child in &mut self.children {
            child.render_tree(gl, frame, cumulative)?;
        }

        *cumulative *= inverse;
        Ok(())
    }
}

/// A scene graph rendered as one compositor layer.
#[derive(Debug)]
pub struct Scene {
    root: SceneObject,
    camera: Camera,
    program: ProgramHandle,
    cumulative: Mat4,
}

impl Scene {
    pub fn new(camera: Camera, program: ProgramHandle) -> Self {
        Self {
            root: SceneObject::new("root"),
            camera,
            program,
            cumulative: Mat4::IDENTITY,
        }
    }

    pub fn root(&self) -> &SceneObject {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut SceneObject {
        &mut self.root
    }

    /// Adds a top-level node.
    pub fn add(&mut self, object: SceneObject) -> &mut SceneObject {
        self.root.add_child(object)
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    /// Value of the cumulative register after the last pass.
    pub fn cumulative(&self) -> Mat4 {
        self.cumulative
    }

    pub fn update(&mut self, time: f64) -> Result<()> {
        self.root.update_tree(time)
    }

    /// Draws the tree into the bound target without clearing or updating it.
    pub fn draw(&mut self, gl: &mut dyn GraphicsContext, time: f64) -> Result<()> {
        self.cumulative = Mat4::IDENTITY;
        gl.use_program(Some(self.program));
        let frame = FrameContext {
            time,
            view_projection: self.camera.view_projection(),
            program: self.program,
        };
        self.root.render_tree(gl, &frame, &mut self.cumulative)
    }
}

impl RenderLayer for Scene {
    fn render(&mut self, gl: &mut dyn GraphicsContext, time: f64) -> Result<()> {
        gl.clear_color(Vec4::ZERO);
        gl.clear(ClearMask::COLOR_AND_DEPTH);
        self.update(time)?;
        trace!(time, "drawing scene");
        self.draw(gl, time)
    }

    fn release(&mut self, gl: &mut dyn GraphicsContext) {
        self.root.release_tree(gl);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use glam::{Quat, Vec3};

    use super::*;
    use crate::gl::{GlCommand, HeadlessContext};
    use crate::shader::{ProgramRegistry, IDENTITY_FRAGMENT_SHADER, IDENTITY_VERTEX_SHADER};

    #[derive(Clone, Default)]
    struct Log {
        events: Rc<RefCell<Vec<String>>>,
        cumulative: Rc<RefCell<Vec<Mat4>>>,
    }

    struct Tracer {
        name: &'static str,
        log: Log,
    }

    impl Updatable for Tracer {
        fn update(&mut self, _time: f64, _transform: &mut Transform) -> Result<()> {
            self.log.events.borrow_mut().push(format!("update {}", self.name));
            Ok(())
        }
    }

    impl Renderable for Tracer {
        fn render(&mut self, _gl: &mut dyn GraphicsContext, ctx: &NodeRenderContext) -> Result<()> {
            self.log.events.borrow_mut().push(format!("render {}", self.name));
            self.log.cumulative.borrow_mut().push(ctx.cumulative);
            Ok(())
        }

        fn release(&mut self, _gl: &mut dyn GraphicsContext) {
            self.log.events.borrow_mut().push(format!("release {}", self.name));
        }
    }

    fn traced(name: &'static str, log: &Log) -> SceneObject {
        SceneObject::with_content(
            name,
            Tracer {
                name,
                log: log.clone(),
            },
        )
    }

    fn scene(gl: &mut HeadlessContext) -> Scene {
        let mut registry = ProgramRegistry::new();
        let program = registry
            .build(gl, "scene", IDENTITY_VERTEX_SHADER, IDENTITY_FRAGMENT_SHADER)
            .unwrap();
        Scene::new(Camera::perspective(1.0, 1.0, 0.1, 100.0), program)
    }

    fn three_levels(log: &Log) -> SceneObject {
        let mut top = traced("a", log);
        top.transform
            .translate_by(Vec3::new(1.0, 2.0, 3.0))
            .rotate_by(Quat::from_rotation_y(0.7));
        let middle = top.add_child(traced("b", log));
        middle
            .transform
            .scale_by(Vec3::new(2.0, 0.5, 3.0))
            .rotate_by(Quat::from_rotation_x(-1.1));
        let bottom = middle.add_child(traced("c", log));
        bottom
            .transform
            .translate_by(Vec3::new(-4.0, 0.25, 9.0))
            .scale_by(Vec3::splat(0.3));
        top
    }

    #[test]
    fn traversal_restores_the_cumulative_register() {
        let mut gl = HeadlessContext::new();
        let log = Log::default();
        let mut root = three_levels(&log);

        let start = Mat4::from_translation(Vec3::new(0.5, -0.5, 0.0));
        let mut cumulative = start;
        let frame = FrameContext {
            time: 0.0,
            view_projection: Mat4::IDENTITY,
            program: ProgramHandle(1),
        };
        root.render_tree(&mut gl, &frame, &mut cumulative).unwrap();

        assert!(cumulative.abs_diff_eq(start, 1e-4));

        let seen = log.cumulative.borrow();
        let a = root.transform.matrix();
        let b = root.children_mut()[0].transform.matrix();
        let c = root.children_mut()[0].children_mut()[0].transform.matrix();
        assert!(seen[0].abs_diff_eq(start * a, 1e-4));
        assert!(seen[1].abs_diff_eq(start * a * b, 1e-4));
        assert!(seen[2].abs_diff_eq(start * a * b * c, 1e-4));
    }

    #[test]
    fn updates_run_parent_first_in_insertion_order() {
        let log = Log::default();
        let mut root = SceneObject::new("root");
        let first = root.add_child(traced("first", &log));
        first.add_child(traced("first.child", &log));
        root.add_child(traced("second", &log));

        root.update_tree(0.0).unwrap();

        assert_eq!(
            *log.events.borrow(),
            vec!["update first", "update first.child", "update second"]
        );
    }

    #[test]
    fn releasing_the_scene_reaches_every_node() {
        let mut gl = HeadlessContext::new();
        let mut scene = scene(&mut gl);
        let log = Log::default();
        scene.add(three_levels(&log));
        scene.add(traced("d", &log));

        RenderLayer::release(&mut scene, &mut gl);

        assert_eq!(
            *log.events.borrow(),
            vec!["release a", "release b", "release c", "release d"]
        );
    }

    #[test]
    fn scene_pass_clears_updates_then_draws() {
        let mut gl = HeadlessContext::new();
        let mut scene = scene(&mut gl);
        let log = Log::default();
        scene.add(three_levels(&log));
        gl.take_commands();

        scene.render(&mut gl, 2.0).unwrap();

        let commands = gl.commands();
        assert_eq!(commands[0], GlCommand::ClearColor(Vec4::ZERO));
        assert_eq!(commands[1], GlCommand::Clear(ClearMask::COLOR_AND_DEPTH));
        assert!(commands.contains(&GlCommand::UseProgram(Some(scene.program()))));
        assert_eq!(
            *log.events.borrow(),
            vec![
                "update a", "update b", "update c", "render a", "render b", "render c"
            ]
        );
        assert!(scene.cumulative().abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn register_is_reset_before_every_pass() {
        let mut gl = HeadlessContext::new();
        let mut scene = scene(&mut gl);
        let log = Log::default();
        scene.add(traced("only", &log));
        scene.cumulative = Mat4::from_scale(Vec3::splat(7.0));

        scene.render(&mut gl, 0.0).unwrap();

        assert_eq!(log.cumulative.borrow()[0], Mat4::IDENTITY);
    }

    #[test]
    fn find_mut_locates_nested_nodes() {
        let log = Log::default();
        let mut root = three_levels(&log);
        assert!(root.find_mut("c").is_some());
        assert!(root.find_mut("missing").is_none());
    }
}
