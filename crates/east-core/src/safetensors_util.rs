use anyhow::{Context, Result};
use memmap2::MmapOptions;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tch::{nn, Device, Kind, Tensor};

/// Metadata key under which full-model saves embed the architecture JSON.
pub const ARCHITECTURE_KEY: &str = "architecture";

/// Names that did not line up between a file and the variable store.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadReport {
    pub loaded: usize,
    /// Present in the model, absent from the file. Left at their current values.
    pub missing: Vec<String>,
    /// Present in the file, absent from the model. Ignored.
    pub unexpected: Vec<String>,
}

pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<LoadReport> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("cannot open weights '{}'", path.display()))?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)
        .with_context(|| format!("'{}' is not a safetensors file", path.display()))?;

    let mut variables = vs.variables();
    let device = vs.device();
    let mut report = LoadReport::default();

    for (name, view) in tensors.tensors() {
        let Some(var) = variables.remove(&name) else {
            log::warn!("tensor {} found in '{}' but not in model", name, path.display());
            report.unexpected.push(name);
            continue;
        };

        let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
        anyhow::ensure!(
            shape == var.size(),
            "shape mismatch for {}: file has {:?}, model has {:?}",
            name,
            shape,
            var.size()
        );
        let kind = match view.dtype() {
            Dtype::F32 => Kind::Float,
            Dtype::F16 => Kind::Half,
            Dtype::BF16 => Kind::BFloat16,
            Dtype::I64 => Kind::Int64,
            _ => return Err(anyhow::anyhow!("unsupported dtype {:?} for {}", view.dtype(), name)),
        };

        let value = Tensor::from_data_size(view.data(), &shape, kind).to_device(device);
        let mut var = var;
        tch::no_grad(|| {
            var.copy_(&value);
        });
        report.loaded += 1;
    }

    report.unexpected.sort();
    report.missing = variables.into_keys().collect();
    report.missing.sort();
    for name in &report.missing {
        log::warn!("tensor {} missing from '{}', keeping initial value", name, path.display());
    }
    Ok(report)
}

/// Writes every variable as little-endian f32 (i64 for integer
/// tensors). `metadata` lands in the safetensors header.
pub fn save_safetensors<P: AsRef<Path>>(
    vs: &nn::VarStore,
    path: P,
    metadata: Option<HashMap<String, String>>,
) -> Result<()> {
    let path = path.as_ref();
    let mut variables: Vec<(String, Tensor)> = vs.variables().into_iter().collect();
    variables.sort_by(|a, b| a.0.cmp(&b.0));

    let mut buffers = Vec::with_capacity(variables.len());
    for (name, var) in &variables {
        let shape: Vec<usize> = var.size().iter().map(|&d| d as usize).collect();
        let flat = var.to_device(Device::Cpu).contiguous().flatten(0, -1);
        let (dtype, bytes) = if var.kind() == Kind::Int64 {
            let values = Vec::<i64>::try_from(&flat)?;
            (Dtype::I64, values.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>())
        } else {
            let values = Vec::<f32>::try_from(&flat.to_kind(Kind::Float))?;
            (Dtype::F32, values.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>())
        };
        buffers.push((name.clone(), dtype, shape, bytes));
    }

    let mut views = Vec::with_capacity(buffers.len());
    for (name, dtype, shape, bytes) in &buffers {
        views.push((name.as_str(), TensorView::new(*dtype, shape.clone(), bytes)?));
    }

    let views = views.iter().map(|(name, view)| (*name, view));
    safetensors::serialize_to_file(views, &metadata, path)
        .with_context(|| format!("cannot write weights to '{}'", path.display()))?;
    Ok(())
}

/// Reads the metadata header without touching tensor data.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let file = File::open(path.as_ref())?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let (_, header) = SafeTensors::read_metadata(&buffer)?;
    Ok(header.metadata().clone().unwrap_or_default())
}
