use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use canvas::headless::{HeadlessDevice, HeadlessFactory, HeadlessTarget};
use canvas::{
    CanvasEvent, CapabilityLevel, ContextOptions, EventKind, InlineDispatcher, LoadOutcome,
    ManualTicks, PlaybackState, RenderInfo, ShaderCanvas, TextureImage, TextureOptions,
    UniformData,
};

type Canvas = ShaderCanvas<HeadlessTarget, HeadlessDevice>;

const TIMED_FRAGMENT: &str = "\
uniform float u_time;
uniform vec2 u_resolution;
void main() {
    vec2 st = gl_FragCoord.xy / u_resolution;
    gl_FragColor = vec4(st, abs(sin(u_time)), 1.0);
}
";

const STATIC_FRAGMENT: &str = "\
uniform vec3 u_color;
void main() {
    gl_FragColor = vec4(u_color, 1.0);
}
";

fn canvas_over(target: HeadlessTarget) -> Canvas {
    ShaderCanvas::with_dispatcher(
        target,
        &HeadlessFactory::new(640, 384),
        ContextOptions::default(),
        Box::new(InlineDispatcher),
    )
}

fn record<T: 'static>(
    canvas: &mut Canvas,
    kind: EventKind,
    extract: impl Fn(&CanvasEvent) -> Option<T> + 'static,
) -> Rc<RefCell<Vec<T>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    canvas.on(kind, move |event| {
        if let Some(value) = extract(event) {
            sink.borrow_mut().push(value);
        }
    });
    seen
}

fn render_infos(canvas: &mut Canvas) -> Rc<RefCell<Vec<RenderInfo>>> {
    record(canvas, EventKind::Render, |event| match event {
        CanvasEvent::Render(info) => Some(*info),
        _ => None,
    })
}

#[test]
fn elapsed_time_follows_tick_timestamps() {
    let mut canvas = canvas_over(HeadlessTarget::new(640.0, 384.0));
    assert_eq!(canvas.load(Some(TIMED_FRAGMENT), None), LoadOutcome::Ready);
    let renders = render_infos(&mut canvas);

    let loaded = Instant::now();
    canvas.reset_playback_at(loaded);
    let ticks: Vec<Instant> = [16, 32, 48]
        .into_iter()
        .map(|ms| loaded + Duration::from_millis(ms))
        .collect();
    for tick in &ticks {
        let report = canvas.tick(*tick).expect("canvas is live");
        assert!(report.drawn);
    }

    let renders = renders.borrow();
    assert_eq!(renders.len(), 3);
    for (info, tick) in renders.iter().zip(&ticks) {
        let expected = *tick - loaded;
        let error = info.elapsed.abs_diff(expected);
        assert!(error < Duration::from_millis(1), "{info:?} vs {expected:?}");
    }
    assert!(renders
        .windows(2)
        .all(|pair| pair[0].elapsed <= pair[1].elapsed));
    assert_eq!(
        renders.iter().map(|info| info.frame).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let device = canvas.device().expect("device");
    assert_eq!(
        device.last_upload("u_resolution"),
        Some(&UniformData::Vec2([640.0, 384.0]))
    );
    assert_eq!(
        device.last_upload("u_time"),
        Some(&UniformData::Float(Duration::from_millis(48).as_secs_f32()))
    );
    assert_eq!(device.draws().len(), 3);
    assert!(device.draws().iter().all(|draw| draw.vertex_count == 6));
}

#[test]
fn identical_values_upload_once_until_the_program_changes() {
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    canvas.load(Some(STATIC_FRAGMENT), None);
    let now = Instant::now();

    canvas.set_uniform("u_color", [1.0, 0.5, 0.0]);
    canvas.tick(now);
    canvas.set_uniform("u_color", [1.0, 0.5, 0.0]);
    canvas.tick(now + Duration::from_millis(16));
    assert_eq!(canvas.device().unwrap().uploads_for("u_color").len(), 1);

    canvas.load(Some(&format!("{STATIC_FRAGMENT}\n")), None);
    canvas.set_uniform("u_color", [1.0, 0.5, 0.0]);
    canvas.tick(now + Duration::from_millis(32));

    let uploads = canvas.device().unwrap().uploads_for("u_color");
    assert_eq!(uploads.len(), 2);
    assert_ne!(uploads[0].0, uploads[1].0);
    assert_eq!(uploads[1].1, UniformData::Vec3([1.0, 0.5, 0.0]));
}

#[test]
fn resize_is_reported_once_per_change() {
    let mut canvas = canvas_over(HeadlessTarget::new(320.0, 200.0).with_pixel_ratio(2.0));
    let now = Instant::now();

    let first = canvas.tick(now).unwrap();
    assert!(first.resized);
    assert!(!canvas.tick(now + Duration::from_millis(16)).unwrap().resized);
    assert!(!canvas.resize());

    canvas.target_mut().set_size(400.0, 200.0);
    assert!(canvas.resize());
    assert!(!canvas.resize());
    let surface = canvas.device().unwrap().surface_size();
    assert_eq!((surface.width, surface.height), (800, 400));
}

#[test]
fn forced_redraw_overrides_pause() {
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    canvas.load(Some(STATIC_FRAGMENT), None);
    canvas.pause();
    assert_eq!(canvas.playback(), PlaybackState::Paused);
    let now = Instant::now();

    assert!(canvas.tick(now).unwrap().drawn, "load forces a first frame");
    assert!(!canvas.tick(now + Duration::from_millis(16)).unwrap().drawn);

    canvas.set_uniform("u_color", [0.0, 1.0, 0.0]);
    assert!(canvas.tick(now + Duration::from_millis(32)).unwrap().drawn);
    assert!(!canvas.tick(now + Duration::from_millis(48)).unwrap().drawn);

    canvas.play();
    assert!(canvas.tick(now + Duration::from_millis(64)).unwrap().drawn);
}

#[test]
fn hidden_targets_only_draw_when_forced() {
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    canvas.target_mut().set_visible(false);
    let now = Instant::now();

    assert!(canvas.tick(now).unwrap().drawn);
    assert!(!canvas.tick(now + Duration::from_millis(16)).unwrap().drawn);
    canvas.target_mut().set_visible(true);
    assert!(canvas.tick(now + Duration::from_millis(32)).unwrap().drawn);
}

#[test]
fn failed_fragment_falls_back_to_a_drawable_program() {
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    let failures = record(&mut canvas, EventKind::ShaderCompileFailed, |event| match event {
        CanvasEvent::ShaderCompileFailed(diagnostics) => Some(diagnostics.clone()),
        _ => None,
    });

    let broken = "void main() {\n    gl_FragColor = vec4(1.0);\n#error broken on purpose\n}\n";
    assert_eq!(canvas.load(Some(broken), None), LoadOutcome::Fallback);
    assert!(!canvas.is_valid());
    assert_eq!(canvas.fragment_source(), broken);

    let failures = failures.borrow();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].source, broken);
    assert!(failures[0].log.starts_with("ERROR: 0:3:"), "{}", failures[0].log);

    assert!(canvas.tick(Instant::now()).unwrap().drawn);
}

#[test]
fn link_failure_keeps_the_previous_program() {
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    assert_eq!(canvas.load(Some(STATIC_FRAGMENT), None), LoadOutcome::Ready);
    let now = Instant::now();
    canvas.tick(now);
    let working = canvas.device().unwrap().draws()[0].program;

    let link_failures = record(&mut canvas, EventKind::ProgramLinkFailed, |event| match event {
        CanvasEvent::ProgramLinkFailed(diagnostics) => Some(diagnostics.log.clone()),
        _ => None,
    });
    let unlinkable = "varying vec3 v_normal;\nvoid main(){ gl_FragColor = vec4(v_normal, 1.0); }";
    assert_eq!(canvas.load(Some(unlinkable), None), LoadOutcome::Retained);
    assert_eq!(link_failures.borrow().len(), 1);
    assert!(!canvas.is_valid());

    assert!(canvas.tick(now + Duration::from_millis(16)).unwrap().drawn);
    let device = canvas.device().unwrap();
    assert_eq!(device.draws().last().unwrap().program, working);
    assert!(device.is_program_live(working));
}

#[test]
fn retained_program_keeps_receiving_standard_uniforms() {
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    assert_eq!(canvas.load(Some(TIMED_FRAGMENT), None), LoadOutcome::Ready);
    let start = Instant::now();
    canvas.reset_playback_at(start);
    assert!(canvas.tick(start + Duration::from_millis(16)).unwrap().drawn);
    assert_eq!(
        canvas.device().unwrap().last_upload("u_time"),
        Some(&UniformData::Float(Duration::from_millis(16).as_secs_f32()))
    );

    let unlinkable = "varying vec3 v_normal;\nvoid main(){ gl_FragColor = vec4(v_normal, 1.0); }";
    assert_eq!(canvas.load(Some(unlinkable), None), LoadOutcome::Retained);
    assert!(canvas.is_animated());

    assert!(canvas.tick(start + Duration::from_millis(500)).unwrap().drawn);
    assert_eq!(
        canvas.device().unwrap().last_upload("u_time"),
        Some(&UniformData::Float(Duration::from_millis(500).as_secs_f32()))
    );
    assert_eq!(
        canvas.device().unwrap().last_upload("u_resolution"),
        Some(&UniformData::Vec2([64.0, 64.0]))
    );
}

#[test]
fn fallback_program_drops_the_rejected_shader_uniforms() {
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    assert_eq!(canvas.load(Some(TIMED_FRAGMENT), None), LoadOutcome::Ready);
    assert!(canvas.is_animated());

    let broken = "uniform float u_time;\nvoid main(){ gl_FragColor = vec4(u_time);";
    assert_eq!(canvas.load(Some(broken), None), LoadOutcome::Fallback);
    assert!(!canvas.is_animated());
}

#[test]
fn program_ready_carries_increasing_generations() {
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    let ready = record(&mut canvas, EventKind::ProgramReady, |event| match event {
        CanvasEvent::ProgramReady { generation } => Some(*generation),
        _ => None,
    });
    canvas.load(Some(STATIC_FRAGMENT), None);
    canvas.load(Some(TIMED_FRAGMENT), None);
    let ready = ready.borrow();
    assert_eq!(ready.len(), 2);
    assert!(ready[0] < ready[1]);
    assert_eq!(canvas.device().unwrap().live_programs(), 1);
}

#[test]
fn destroy_is_idempotent_and_stops_ticks() {
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    canvas.load_texture(
        "u_tex",
        TextureImage::solid([255, 0, 0, 255]),
        TextureOptions::default(),
    );
    canvas.tick(Instant::now());

    canvas.destroy();
    assert!(!canvas.is_alive());
    assert!(canvas.device().is_none());
    assert!(canvas.tick(Instant::now()).is_none());
    assert_eq!(canvas.load(Some(STATIC_FRAGMENT), None), LoadOutcome::Failed);
    canvas.destroy();
}

#[test]
fn texture_reloads_reuse_the_gpu_handle() {
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    canvas.load(
        Some(
            "uniform sampler2D u_tex;\nuniform vec2 u_texResolution;\n\
             void main(){ gl_FragColor = texture2D(u_tex, gl_FragCoord.xy / u_texResolution); }",
        ),
        None,
    );
    let loaded = record(&mut canvas, EventKind::TextureLoaded, |event| match event {
        CanvasEvent::TextureLoaded { name, width, height } => Some((name.clone(), *width, *height)),
        _ => None,
    });
    let now = Instant::now();

    canvas.load_texture("u_tex", TextureImage::solid([255, 0, 0, 255]), TextureOptions::default());
    canvas.tick(now);
    let pixels = TextureImage::from_rgba(2, 1, vec![0, 255, 0, 255, 0, 0, 255, 255]).unwrap();
    canvas.load_texture("u_tex", pixels, TextureOptions::default());
    canvas.tick(now + Duration::from_millis(16));

    assert_eq!(
        *loaded.borrow(),
        vec![("u_tex".to_string(), 1, 1), ("u_tex".to_string(), 2, 1)]
    );
    let device = canvas.device().unwrap();
    assert_eq!(device.textures_created(), 1);
    let handle = *device.bound_textures().get(&0).expect("unit 0 bound");
    assert_eq!(device.texture_writes(handle), 2);
    assert_eq!(device.last_upload("u_tex"), Some(&UniformData::Int(0)));
    assert_eq!(
        device.last_upload("u_texResolution"),
        Some(&UniformData::Vec2([2.0, 1.0]))
    );
}

#[test]
fn failed_textures_are_reported_and_keep_nothing_bound() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.png");
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    let failed = record(&mut canvas, EventKind::TextureFailed, |event| match event {
        CanvasEvent::TextureFailed { name, .. } => Some(name.clone()),
        _ => None,
    });

    canvas.load_texture("u_tex", missing.as_path(), TextureOptions::default());
    canvas.tick(Instant::now());

    assert_eq!(*failed.borrow(), vec!["u_tex".to_string()]);
    assert_eq!(canvas.device().unwrap().textures_created(), 0);
}

#[test]
fn texture_uniform_retries_after_a_failed_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.png");
    let reference = path.to_str().unwrap().to_owned();
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    let loaded = record(&mut canvas, EventKind::TextureLoaded, |event| match event {
        CanvasEvent::TextureLoaded { name, .. } => Some(name.clone()),
        _ => None,
    });
    let failed = record(&mut canvas, EventKind::TextureFailed, |event| match event {
        CanvasEvent::TextureFailed { name, .. } => Some(name.clone()),
        _ => None,
    });

    canvas.set_uniform("u_tex", [reference.as_str()]);
    let now = Instant::now();
    canvas.tick(now);
    assert_eq!(*failed.borrow(), vec!["u_tex".to_string()]);

    image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 255, 0, 255]))
        .save(&path)
        .unwrap();
    canvas.set_uniform("u_tex", [reference.as_str()]);
    canvas.tick(now + Duration::from_millis(16));
    assert_eq!(*loaded.borrow(), vec!["u_tex".to_string()]);

    // Once loaded, the same source is not fetched again.
    canvas.set_uniform("u_tex", [reference.as_str()]);
    canvas.tick(now + Duration::from_millis(32));
    assert_eq!(loaded.borrow().len(), 1);
    assert_eq!(canvas.device().unwrap().textures_created(), 1);
}

#[test]
fn acquisition_walks_the_capability_list() {
    let factory =
        HeadlessFactory::new(32, 32).reject(&[CapabilityLevel::HighPerformance, CapabilityLevel::LowPower]);
    let canvas: Canvas = ShaderCanvas::with_dispatcher(
        HeadlessTarget::new(32.0, 32.0),
        &factory,
        ContextOptions::default(),
        Box::new(InlineDispatcher),
    );
    assert_eq!(canvas.capability_level(), Some(CapabilityLevel::Compatibility));
    assert_eq!(
        factory.attempts(),
        vec![
            CapabilityLevel::HighPerformance,
            CapabilityLevel::LowPower,
            CapabilityLevel::Compatibility
        ]
    );
}

#[test]
fn pointer_feeds_the_mouse_uniform() {
    let mut canvas = canvas_over(HeadlessTarget::new(100.0, 50.0));
    canvas.load(
        Some("uniform vec2 u_mouse;\nvoid main(){ gl_FragColor = vec4(u_mouse / 100.0, 0.0, 1.0); }"),
        None,
    );
    canvas.target_mut().set_pointer(Some((10.0, 20.0)));
    canvas.tick(Instant::now());
    assert_eq!(
        canvas.device().unwrap().last_upload("u_mouse"),
        Some(&UniformData::Vec2([10.0, 30.0]))
    );
}

#[test]
fn run_draws_until_ticks_run_out() {
    let mut canvas = canvas_over(HeadlessTarget::new(64.0, 64.0));
    canvas.load(Some(TIMED_FRAGMENT), None);
    let start = Instant::now();
    let mut ticks = ManualTicks::new((1..=5).map(|n| start + Duration::from_millis(16 * n)));
    assert_eq!(canvas.run(&mut ticks), 5);
    assert_eq!(canvas.frames(), 5);
}

#[test]
fn background_colour_is_used_for_clears() {
    let options = ContextOptions {
        background: [0.1, 0.2, 0.3, 1.0],
        ..ContextOptions::default()
    };
    let mut canvas: Canvas = ShaderCanvas::with_dispatcher(
        HeadlessTarget::new(16.0, 16.0),
        &HeadlessFactory::new(16, 16),
        options,
        Box::new(InlineDispatcher),
    );
    canvas.tick(Instant::now());
    assert_eq!(
        canvas.device().unwrap().draws()[0].clear_color,
        [0.1, 0.2, 0.3, 1.0]
    );
}
