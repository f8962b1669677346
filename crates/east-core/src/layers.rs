use tch::{nn, nn::ModuleT, Tensor};

/// Convolution, batch norm and ReLU, the building block of every stage.
#[derive(Debug)]
pub struct ConvBnRelu {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
}

impl ConvBnRelu {
    pub fn new(vs: &nn::Path, c_in: i64, c_out: i64, kernel: i64, stride: i64, eps: f64) -> Self {
        let conv_config = nn::ConvConfig {
            stride,
            padding: kernel / 2,
            bias: false,
            ..Default::default()
        };
        let conv = nn::conv2d(vs / "conv", c_in, c_out, kernel, conv_config);
        let bn = nn::batch_norm2d(
            vs / "bn",
            c_out,
            nn::BatchNormConfig {
                eps,
                ..Default::default()
            },
        );
        Self { conv, bn }
    }
}

impl ModuleT for ConvBnRelu {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.apply(&self.conv).apply_t(&self.bn, train).relu()
    }
}

/// A stride-2 `ConvBnRelu` followed by a stride-1 one.
#[derive(Debug)]
pub struct Stage {
    down: ConvBnRelu,
    refine: ConvBnRelu,
}

impl Stage {
    pub fn new(vs: &nn::Path, c_in: i64, c_out: i64, eps: f64) -> Self {
        Self {
            down: ConvBnRelu::new(&(vs / "down"), c_in, c_out, 3, 2, eps),
            refine: ConvBnRelu::new(&(vs / "refine"), c_out, c_out, 3, 1, eps),
        }
    }
}

impl ModuleT for Stage {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.refine.forward_t(&self.down.forward_t(xs, train), train)
    }
}
