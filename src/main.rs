use std::{env, error::Error, sync::Arc};

use volume_compositor::{
    AnnotationLayer, ColorTransferFunction, ColormapRegistry, LabelPalette, Layer, Orientation,
    ViewDirection, ViewerConfig, Viewport, VolumeBuffer, Window,
};

const DIMS: [usize; 3] = [128, 128, 64];
const SPACING: [f32; 3] = [1.0, 1.0, 2.0];

/// Head-like phantom: a bright shell around a soft-tissue ellipsoid, in HU.
fn phantom() -> Result<VolumeBuffer, volume_compositor::Error> {
    let [nx, ny, nz] = DIMS;
    let mut data = Vec::with_capacity(nx * ny * nz);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let dx = (x as f32 - nx as f32 / 2.0) / (nx as f32 * 0.42);
                let dy = (y as f32 - ny as f32 / 2.0) / (ny as f32 * 0.48);
                let dz = (z as f32 - nz as f32 / 2.0) / (nz as f32 * 0.45);
                let r = (dx * dx + dy * dy + dz * dz).sqrt();
                let value = match r {
                    r if r > 1.0 => -1000.0,
                    r if r > 0.92 => 1200.0,
                    r => 40.0 - 30.0 * r,
                };
                data.push(value);
            }
        }
    }
    VolumeBuffer::new(data, DIMS, SPACING, Orientation::LPS)
}

/// Two labelled spheres for the overlay layer.
fn segmentation() -> Result<VolumeBuffer, volume_compositor::Error> {
    let [nx, ny, nz] = DIMS;
    let spheres = [([50.0, 60.0, 32.0], 12.0, 1.0), ([80.0, 70.0, 34.0], 8.0, 3.0)];
    let mut data = Vec::with_capacity(nx * ny * nz);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let p = [x as f32, y as f32, z as f32];
                let label = spheres
                    .iter()
                    .find(|(c, radius, _)| {
                        let d2: f32 = (0..3).map(|i| ((p[i] - c[i]) * SPACING[i]).powi(2)).sum();
                        d2 <= radius * radius
                    })
                    .map_or(0.0, |(_, _, label)| *label);
                data.push(label);
            }
        }
    }
    VolumeBuffer::new(data, DIMS, SPACING, Orientation::LPS)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut viewport = Viewport::new(ViewerConfig::default(), ViewDirection::Axial, 512, 512)?;

    match env::args().nth(1) {
        #[cfg(feature = "dicom")]
        Some(dir) => {
            use volume_compositor::{enums::SortBy, volume_loader::VolumeLoader};

            let volume = VolumeLoader::load_from_directory(&dir, SortBy::ImagePositionPatient)?;
            viewport.add_layer(Layer::grayscale("series", Arc::new(volume)));
        }
        #[cfg(not(feature = "dicom"))]
        Some(_) => return Err("built without the `dicom` feature".into()),
        None => {
            let ct = Arc::new(phantom()?);
            let registry = ColormapRegistry::builtin();
            let transfer = ColorTransferFunction::continuous(Window::new(40.0, 400.0)?, &registry, "gray");
            viewport.add_layer(Layer::new("phantom", Arc::clone(&ct), transfer));
            viewport.add_layer(
                Layer::new(
                    "segmentation",
                    Arc::new(segmentation()?),
                    ColorTransferFunction::discrete(LabelPalette::segmentation()),
                )
                .with_opacity(0.5),
            );

            let mut annotation = AnnotationLayer::new(ct.geometry().clone());
            annotation.add_marker(ct.geometry().voxel_to_world([64.0, 30.0, 32.0]), 2)?;
            annotation.add_marker(ct.geometry().voxel_to_world([90.0, 90.0, 32.0]), 7)?;
            viewport.set_annotation(Some(annotation));

            viewport.begin_paint(4, 3.0)?;
            for step in 0..=20 {
                viewport.paint_to(180.0 + step as f32 * 8.0, 380.0)?;
            }
            viewport.end_gesture()?;
        }
    }

    if let Some(readout) = viewport.probe(256.0, 256.0) {
        log::info!("center: {readout}");
    }
    viewport.render().save("composite.png")?;
    Ok(())
}
