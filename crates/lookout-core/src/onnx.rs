//! ONNX Runtime plumbing shared by the three networks.

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INTRA_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("{kind} model missing at {path}; {hint}")]
    Missing {
        kind: &'static str,
        path: String,
        hint: &'static str,
    },
    #[error("{kind} model at {path} could not be opened: {source}")]
    Open {
        kind: &'static str,
        path: String,
        source: ort::Error,
    },
}

/// Which network a session runs, for logs and error messages.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ModelKind {
    pub name: &'static str,
    /// Where to get the file when it is missing.
    pub hint: &'static str,
}

pub(crate) fn open_session(kind: ModelKind, model_path: &str) -> Result<Session, ModelError> {
    if !Path::new(model_path).is_file() {
        return Err(ModelError::Missing {
            kind: kind.name,
            path: model_path.to_string(),
            hint: kind.hint,
        });
    }

    let open = || -> Result<Session, ort::Error> {
        Ok(Session::builder()?
            .with_intra_threads(INTRA_THREADS)?
            .commit_from_file(model_path)?)
    };
    let session = open().map_err(|source| ModelError::Open {
        kind: kind.name,
        path: model_path.to_string(),
        source,
    })?;

    tracing::info!(
        model = kind.name,
        path = model_path,
        inputs = session.inputs().len(),
        outputs = ?output_names(&session),
        "model ready"
    );
    Ok(session)
}

pub(crate) fn output_names(session: &Session) -> Vec<String> {
    session.outputs().iter().map(|o| o.name().to_string()).collect()
}

/// Feed one NCHW tensor and copy every f32 output out, in declaration order.
pub(crate) fn infer(session: &mut Session, input: &Array4<f32>) -> Result<Vec<Vec<f32>>, ort::Error> {
    let count = session.outputs().len();
    let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
    (0..count)
        .map(|i| outputs[i].try_extract_tensor::<f32>().map(|(_, data)| data.to_vec()))
        .collect()
}

/// Planar float tensor of a whole image. `order[c]` picks the source channel
/// for plane `c`.
pub(crate) fn planar<F>(image: &RgbImage, order: [usize; 3], normalize: F) -> Array4<f32>
where
    F: Fn(u8) -> f32,
{
    let (w, h) = image.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        normalize(image.get_pixel(x as u32, y as u32).0[order[c]])
    })
}
