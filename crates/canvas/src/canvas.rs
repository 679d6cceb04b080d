//! The runtime object tying context, program, uniforms, textures, scheduler
//! and events together around one render target.

use std::time::Instant;

use chrono::{Datelike, Local, Timelike};

use crate::device::{
    CapabilityLevel, ContextOptions, DeviceFactory, GraphicsContext, GraphicsDevice,
    QUAD_POSITIONS, QUAD_TEXCOORDS, QUAD_VERTEX_COUNT,
};
use crate::events::{CanvasEvent, EventBus, EventKind, RenderInfo, SubscriptionId};
use crate::program::{LoadOutcome, ProgramSlot, DEFAULT_FRAGMENT_SHADER, DEFAULT_VERTEX_SHADER};
use crate::scheduler::{PlaybackState, RenderScheduler, TickSource};
use crate::target::{drawable_size, pointer_pixels, RenderTarget, FRAGMENT_ATTRIBUTE, VERTEX_ATTRIBUTE};
use crate::textures::{Dispatcher, TextureManager, TextureOptions, TextureSource, ThreadDispatcher};
use crate::uniforms::{infer, usage, UniformData, UniformRegistry, UniformUsage, UniformValue};

/// What a single [`ShaderCanvas::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    pub drawn: bool,
    pub resized: bool,
}

/// A live shader bound to one render target.
///
/// Construction never fails: when no graphics context can be acquired the
/// canvas is inert, every method becomes a no-op and [`tick`](Self::tick)
/// returns `None`.
pub struct ShaderCanvas<T: RenderTarget, D: GraphicsDevice> {
    target: T,
    context: Option<GraphicsContext<D>>,
    options: ContextOptions,
    program: ProgramSlot,
    registry: UniformRegistry,
    textures: TextureManager,
    scheduler: RenderScheduler,
    events: EventBus,
    fragment: String,
    vertex: String,
    usage: UniformUsage,
}

impl<T: RenderTarget, D: GraphicsDevice> ShaderCanvas<T, D> {
    /// Creates a canvas that loads textures on worker threads.
    pub fn new<F>(target: T, factory: &F, options: ContextOptions) -> Self
    where
        F: DeviceFactory<Device = D>,
    {
        Self::with_dispatcher(target, factory, options, Box::new(ThreadDispatcher))
    }

    pub fn with_dispatcher<F>(
        target: T,
        factory: &F,
        options: ContextOptions,
        dispatcher: Box<dyn Dispatcher>,
    ) -> Self
    where
        F: DeviceFactory<Device = D>,
    {
        let fragment = target
            .attribute(FRAGMENT_ATTRIBUTE)
            .unwrap_or_else(|| DEFAULT_FRAGMENT_SHADER.to_owned());
        let vertex = target
            .attribute(VERTEX_ATTRIBUTE)
            .unwrap_or_else(|| DEFAULT_VERTEX_SHADER.to_owned());

        let context = GraphicsContext::acquire(factory, &options);
        let mut scheduler = RenderScheduler::new(Instant::now());
        if context.is_none() {
            tracing::warn!("canvas is inert: no graphics context");
            scheduler.destroy();
        }

        let mut canvas = Self {
            target,
            context,
            options,
            program: ProgramSlot::new(),
            registry: UniformRegistry::new(),
            textures: TextureManager::new(dispatcher),
            scheduler,
            events: EventBus::new(),
            usage: UniformUsage::scan(&fragment),
            fragment,
            vertex,
        };

        if let Some(device) = canvas.device_slot() {
            device.upload_geometry(&QUAD_POSITIONS, &QUAD_TEXCOORDS);
            canvas.reload();
        }
        canvas
    }

    fn device_slot(&mut self) -> Option<&mut D> {
        self.context.as_mut().and_then(GraphicsContext::device_mut)
    }

    /// Replaces the given sources and rebuilds the program. `None` keeps the
    /// current source for that stage.
    pub fn load(&mut self, fragment: Option<&str>, vertex: Option<&str>) -> LoadOutcome {
        if !self.scheduler.is_alive() {
            return LoadOutcome::Failed;
        }
        if let Some(fragment) = fragment {
            self.fragment = fragment.to_owned();
        }
        if let Some(vertex) = vertex {
            self.vertex = vertex.to_owned();
        }
        self.reload()
    }

    fn reload(&mut self) -> LoadOutcome {
        let Some(device) = self.context.as_mut().and_then(GraphicsContext::device_mut) else {
            return LoadOutcome::Failed;
        };
        let outcome = self
            .program
            .load(device, &mut self.events, &self.fragment, &self.vertex);
        // Standard uniforms follow the program on screen, which a failed
        // link leaves unchanged.
        if outcome.swapped() {
            self.usage = UniformUsage::scan(self.program.active_fragment(&self.fragment));
            self.registry.invalidate();
        }
        self.scheduler.request_redraw();
        tracing::debug!(?outcome, animated = self.usage.is_animated(), "shader loaded");
        outcome
    }

    /// Sets one uniform from a list of values. A single value is used as is,
    /// several become a list, so `[0.5]` is a float and `[1.0, 0.0, 0.0]` a
    /// `vec3`.
    pub fn set_uniform<V, I>(&mut self, name: &str, values: I)
    where
        V: Into<UniformValue>,
        I: IntoIterator<Item = V>,
    {
        let mut values: Vec<UniformValue> = values.into_iter().map(Into::into).collect();
        let value = if values.len() == 1 {
            values.remove(0)
        } else {
            UniformValue::List(values)
        };
        self.set_uniforms([(name, value)]);
    }

    pub fn set_uniforms<K, V, I>(&mut self, uniforms: I)
    where
        K: AsRef<str>,
        V: Into<UniformValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        if !self.scheduler.is_alive() {
            return;
        }
        let mut changed = false;
        for (name, value) in uniforms {
            let descriptors = infer(&value.into(), name.as_ref(), None);
            changed |= self.registry.apply(descriptors, &mut self.textures);
        }
        if changed {
            self.scheduler.request_redraw();
        }
    }

    /// Schedules new contents for texture `name`; the sampler uniform of the
    /// same name is bound once the load completes.
    pub fn load_texture(
        &mut self,
        name: &str,
        source: impl Into<TextureSource>,
        options: TextureOptions,
    ) {
        if !self.scheduler.is_alive() {
            return;
        }
        self.textures.load(name, source.into(), options);
    }

    pub fn play(&mut self) {
        self.scheduler.play();
    }

    pub fn pause(&mut self) {
        self.scheduler.pause();
    }

    pub fn toggle_playback(&mut self) -> PlaybackState {
        self.scheduler.toggle()
    }

    pub fn reset_playback(&mut self) {
        self.reset_playback_at(Instant::now());
    }

    pub fn reset_playback_at(&mut self, now: Instant) {
        self.scheduler.reset_playback(now);
    }

    pub fn playback(&self) -> PlaybackState {
        self.scheduler.state()
    }

    /// Re-reads the target size and resizes the surface when it changed.
    pub fn resize(&mut self) -> bool {
        if !self.scheduler.is_alive() {
            return false;
        }
        let Some(device) = self.context.as_mut().and_then(GraphicsContext::device_mut) else {
            return false;
        };
        check_resize(&self.target, &mut self.scheduler, device)
    }

    /// Runs one frame of the loop at `now`. Returns `None` once the canvas is
    /// destroyed or when it is inert.
    pub fn tick(&mut self, now: Instant) -> Option<FrameReport> {
        if !self.scheduler.is_alive() {
            return None;
        }
        let device = self.context.as_mut().and_then(GraphicsContext::device_mut)?;

        if self.textures.drain(device, &mut self.events) {
            self.scheduler.request_redraw();
        }
        let resized = check_resize(&self.target, &mut self.scheduler, device);

        if self.usage.mouse {
            if let Some(mouse) = pointer_pixels(&self.target) {
                self.registry.apply_one(usage::MOUSE, UniformData::Vec2(mouse));
            }
        }

        let mut report = FrameReport {
            drawn: false,
            resized,
        };
        if !self.scheduler.should_draw(self.target.is_visible()) {
            return Some(report);
        }
        let Some(program) = self.program.current() else {
            return Some(report);
        };

        let (elapsed, delta) = self.scheduler.begin_frame(now);
        if self.usage.time {
            self.registry
                .apply_one(usage::TIME, UniformData::Float(elapsed.as_secs_f32()));
        }
        if self.usage.delta {
            self.registry
                .apply_one(usage::DELTA, UniformData::Float(delta.as_secs_f32()));
        }
        if self.usage.date {
            self.registry.apply_one(usage::DATE, UniformData::Vec4(wall_clock_date()));
        }
        if self.usage.resolution {
            if let Some(size) = self.scheduler.last_size() {
                self.registry
                    .apply_one(usage::RESOLUTION, UniformData::Vec2(size.as_vec2()));
            }
        }

        device.clear(self.options.background);
        self.textures.bind(device, &mut self.registry);
        let uploads = self.registry.flush(device, program);

        match device.draw(program, QUAD_VERTEX_COUNT) {
            Ok(()) => {
                let frame = self.scheduler.mark_drawn();
                tracing::trace!(frame, uploads, "frame drawn");
                self.events.emit(&CanvasEvent::Render(RenderInfo {
                    elapsed,
                    delta,
                    frame,
                }));
                report.drawn = true;
            }
            Err(err) => {
                tracing::warn!(error = %err, "draw failed; retrying next tick");
                self.scheduler.request_redraw();
            }
        }
        Some(report)
    }

    /// Ticks at every instant `ticks` yields until it runs dry or the canvas
    /// is destroyed. Returns the number of frames drawn.
    pub fn run<S: TickSource + ?Sized>(&mut self, ticks: &mut S) -> u64 {
        let mut drawn = 0;
        while self.scheduler.is_alive() {
            let Some(now) = ticks.next_tick() else {
                break;
            };
            if let Some(report) = self.tick(now) {
                drawn += u64::from(report.drawn);
            }
        }
        drawn
    }

    /// Releases every GPU resource and stops future ticks. Later calls do
    /// nothing.
    pub fn destroy(&mut self) {
        let was_alive = self.scheduler.is_alive();
        self.scheduler.destroy();
        if let Some(context) = self.context.as_mut() {
            if let Some(device) = context.device_mut() {
                self.textures.release_all(device);
                self.program.release(device);
            }
            if context.destroy() {
                tracing::debug!("canvas destroyed");
            }
        }
        if was_alive {
            self.registry.clear();
        }
    }

    pub fn on<F>(&mut self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: FnMut(&CanvasEvent) + 'static,
    {
        self.events.subscribe(kind, listener)
    }

    pub fn off(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn device(&self) -> Option<&D> {
        self.context.as_ref().and_then(GraphicsContext::device)
    }

    pub fn capability_level(&self) -> Option<CapabilityLevel> {
        self.context.as_ref().map(GraphicsContext::level)
    }

    /// True when construction could not acquire a graphics context.
    pub fn is_inert(&self) -> bool {
        self.context.is_none()
    }

    pub fn is_alive(&self) -> bool {
        self.scheduler.is_alive()
    }

    /// Whether the active program was built from the current sources.
    pub fn is_valid(&self) -> bool {
        self.program.is_valid()
    }

    /// Whether the fragment shader reads a time, date or mouse uniform.
    pub fn is_animated(&self) -> bool {
        self.usage.is_animated()
    }

    pub fn fragment_source(&self) -> &str {
        &self.fragment
    }

    pub fn vertex_source(&self) -> &str {
        &self.vertex
    }

    pub fn frames(&self) -> u64 {
        self.scheduler.frames()
    }

    /// Last value recorded for a uniform, user-supplied or injected.
    pub fn uniform(&self, name: &str) -> Option<&UniformData> {
        self.registry.get(name)
    }
}

impl<T: RenderTarget, D: GraphicsDevice> Drop for ShaderCanvas<T, D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn check_resize<T, D>(target: &T, scheduler: &mut RenderScheduler, device: &mut D) -> bool
where
    T: RenderTarget,
    D: GraphicsDevice,
{
    let size = drawable_size(target);
    if !scheduler.check_resize(size) {
        return false;
    }
    tracing::debug!(width = size.width, height = size.height, "render target resized");
    device.resize_surface(size.width, size.height);
    true
}

/// `[year, month (0-based), day, seconds since midnight]` in local time.
fn wall_clock_date() -> [f32; 4] {
    let now = Local::now();
    let seconds =
        f64::from(now.num_seconds_from_midnight()) + f64::from(now.nanosecond() % 1_000_000_000) / 1e9;
    [
        now.year() as f32,
        now.month0() as f32,
        now.day() as f32,
        seconds as f32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, HeadlessFactory, HeadlessTarget};
    use crate::textures::InlineDispatcher;

    fn canvas(target: HeadlessTarget) -> ShaderCanvas<HeadlessTarget, HeadlessDevice> {
        ShaderCanvas::with_dispatcher(
            target,
            &HeadlessFactory::new(64, 64),
            ContextOptions::default(),
            Box::new(InlineDispatcher),
        )
    }

    #[test]
    fn sources_come_from_target_attributes() {
        let fragment = "uniform float u_time;\nvoid main(){ gl_FragColor = vec4(u_time); }";
        let canvas = canvas(
            HeadlessTarget::new(10.0, 10.0).with_attribute(FRAGMENT_ATTRIBUTE, fragment),
        );
        assert_eq!(canvas.fragment_source(), fragment);
        assert_eq!(canvas.vertex_source(), DEFAULT_VERTEX_SHADER);
        assert!(canvas.is_valid());
        assert!(canvas.is_animated());
    }

    #[test]
    fn geometry_is_uploaded_on_construction() {
        let canvas = canvas(HeadlessTarget::new(10.0, 10.0));
        assert!(canvas.device().expect("device").has_geometry());
    }

    #[test]
    fn inert_canvas_ignores_everything() {
        let mut canvas: ShaderCanvas<_, HeadlessDevice> = ShaderCanvas::with_dispatcher(
            HeadlessTarget::new(10.0, 10.0),
            &HeadlessFactory::unavailable(),
            ContextOptions::default(),
            Box::new(InlineDispatcher),
        );
        assert!(canvas.is_inert());
        assert_eq!(canvas.load(Some("void main(){}"), None), LoadOutcome::Failed);
        canvas.set_uniform("u_x", [1.0]);
        assert!(!canvas.resize());
        assert!(canvas.tick(Instant::now()).is_none());
        canvas.destroy();
    }

    #[test]
    fn single_value_uniform_is_unwrapped() {
        let mut canvas = canvas(HeadlessTarget::new(10.0, 10.0));
        canvas.set_uniform("u_speed", [0.5]);
        canvas.set_uniform("u_color", [1.0, 0.5, 0.25]);
        assert_eq!(canvas.uniform("u_speed"), Some(&UniformData::Float(0.5)));
        assert_eq!(canvas.uniform("u_color"), Some(&UniformData::Vec3([1.0, 0.5, 0.25])));
    }

    #[test]
    fn mouse_is_fed_when_used() {
        let fragment = "uniform vec2 u_mouse;\nvoid main(){ gl_FragColor = vec4(u_mouse, 0.0, 1.0); }";
        let mut target = HeadlessTarget::new(100.0, 50.0).with_attribute(FRAGMENT_ATTRIBUTE, fragment);
        target.set_pointer(Some((10.0, 20.0)));
        let mut canvas = canvas(target);
        canvas.tick(Instant::now());
        assert_eq!(canvas.uniform(usage::MOUSE), Some(&UniformData::Vec2([10.0, 30.0])));
        assert_eq!(
            canvas.device().expect("device").last_upload(usage::MOUSE),
            Some(&UniformData::Vec2([10.0, 30.0]))
        );
    }

    #[test]
    fn failed_draw_keeps_redraw_pending() {
        let mut canvas = canvas(HeadlessTarget::new(10.0, 10.0));
        canvas.pause();
        if let Some(device) = canvas.device_slot() {
            device.fail_next_draws(1);
        }
        let first = canvas.tick(Instant::now()).expect("alive");
        assert!(!first.drawn);
        let second = canvas.tick(Instant::now()).expect("alive");
        assert!(second.drawn);
    }

    #[test]
    fn date_has_zero_based_month() {
        let date = wall_clock_date();
        assert!((0.0..12.0).contains(&date[1]));
        assert!((1.0..=31.0).contains(&date[2]));
        assert!((0.0..86_401.0).contains(&date[3]));
    }
}
