use console::Style;
use opticam_core::differential::RelativeLightCurve;
use opticam_core::photometry::QualityFlag;
use opticam_core::pipeline::config::{PhotometryMethod, ReductionConfig};
use opticam_core::pipeline::{ReductionOutput, RunWarning};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    good: Style,
    warn: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            good: Style::new().green(),
            warn: Style::new().yellow(),
        }
    }
}

pub fn print_config_summary(config: &ReductionConfig, cameras: usize, frames: usize) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("OptiCam Reduction"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(17)));
    println!();
    println!("  {:<14}{}", s.label.apply_to("Cameras"), s.value.apply_to(cameras));
    println!("  {:<14}{}", s.label.apply_to("Science"), s.value.apply_to(format!("{frames} frames")));
    println!(
        "  {:<14}{}",
        s.label.apply_to("Combine"),
        s.good.apply_to(&config.calibration.combine)
    );
    let method = match &config.photometry.method {
        PhotometryMethod::Aperture { radius, recenter: false } => format!("aperture r={radius}"),
        PhotometryMethod::Aperture { radius, recenter: true } => format!("aperture r={radius}, recentred"),
        PhotometryMethod::Psf { fit_radius } => format!("PSF r={fit_radius}"),
    };
    println!("  {:<14}{}", s.label.apply_to("Photometry"), s.good.apply_to(method));
    println!(
        "  {:<14}{}",
        s.label.apply_to("Annulus"),
        s.value.apply_to(format!(
            "{}-{} px",
            config.photometry.annulus.inner, config.photometry.annulus.outer
        ))
    );
    println!();
}

pub fn print_run_summary(output: &ReductionOutput) {
    let s = Styles::new();
    let report = &output.report;

    println!();
    println!("  {}", s.header.apply_to("Run"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Calibrated"),
        s.value.apply_to(format!("{}/{}", report.frames_calibrated, report.science_frames))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Registered"),
        s.value.apply_to(format!("{}/{}", report.frames_registered, report.science_frames))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Measurements"),
        s.value.apply_to(report.measurements)
    );
    println!();

    println!("  {}", s.header.apply_to("Cameras"));
    for (camera, catalog) in &output.catalogs {
        let curves = output.curves_for(*camera).count();
        let transform = if output.field.transforms.contains_key(camera) {
            s.good.apply_to("aligned")
        } else {
            s.warn.apply_to("not aligned")
        };
        println!(
            "    {:<14}{} sources, {} curves, {}",
            s.label.apply_to(camera),
            s.value.apply_to(catalog.len()),
            s.value.apply_to(curves),
            transform
        );
    }
    for (camera, reason) in report.failed_cameras() {
        println!("    {:<14}{}", s.label.apply_to(camera), s.warn.apply_to(reason));
    }
    println!(
        "    {:<14}{}",
        s.label.apply_to("Field"),
        s.value.apply_to(format!("{} physical sources", output.field.sources.len()))
    );
    println!();

    println!("  {}", s.header.apply_to("Light curves"));
    for curve in &output.light_curves {
        let n = curve.len();
        let mean = if n > 0 {
            curve.fluxes().sum::<f64>() / n as f64
        } else {
            0.0
        };
        let ok = curve.count_flag(QualityFlag::Ok);
        let flags = if ok == n {
            s.good.apply_to(format!("{ok}/{n} OK"))
        } else {
            s.warn.apply_to(format!("{ok}/{n} OK"))
        };
        println!(
            "    {:<14}{:>5} pts  mean {:>10.1}  {}  {} gap(s)",
            s.label.apply_to(format!("{} {}", curve.camera, curve.source)),
            n,
            mean,
            flags,
            curve.gaps.len()
        );
    }
    println!();

    if report.is_clean() {
        println!("  {}", s.good.apply_to("No warnings"));
    } else {
        println!("  {}", s.header.apply_to("Warnings"));
        for warning in &report.warnings {
            println!("    {}", s.warn.apply_to(describe(warning)));
        }
    }
    println!();
}

pub fn print_differential(curve: &RelativeLightCurve) {
    let s = Styles::new();
    let comparisons: Vec<String> = curve.comparisons.iter().map(|c| c.to_string()).collect();

    println!(
        "  {}",
        s.header.apply_to(format!(
            "Differential {} {} / {}",
            curve.camera,
            curve.target,
            comparisons.join(" + ")
        ))
    );
    for point in &curve.points {
        println!(
            "    {:>10.2}  {:>9.5} \u{00b1} {:<9.5} {}",
            point.timestamp, point.ratio, point.ratio_err, point.flag
        );
    }
    println!();
}

fn describe(warning: &RunWarning) -> String {
    match warning {
        RunWarning::RejectedCalibrationFrame(r) => {
            format!("{} {:?} frame {} rejected: {}", r.camera, r.kind, r.frame, r.reason)
        }
        RunWarning::CalibrationFailed { camera, frame, reason } => {
            format!("{camera} frame {frame} not calibrated: {reason}")
        }
        RunWarning::RegistrationFailed { camera, frame, reason } => {
            format!("{camera} frame {frame} not registered: {reason}")
        }
        RunWarning::PhotometryFailed { camera, frame, reason } => {
            format!("{camera} frame {frame} not measured: {reason}")
        }
        RunWarning::CameraFailed { camera, reason } => format!("{camera} failed: {reason}"),
        RunWarning::FieldRegistrationFailed { camera, reason } => {
            format!("{camera} not aligned to field: {reason}")
        }
        RunWarning::MeasurementDropped(dropped) => format!("measurement dropped: {dropped:?}"),
        RunWarning::InsufficientCoverage {
            camera,
            source,
            measured,
            frames,
        } => format!("{camera} {source} measured in {measured}/{frames} frames"),
    }
}
