use wgpu::{
    Device, Extent3d, SurfaceConfiguration, TextureDescriptor, TextureDimension, TextureFormat,
    TextureUsages, TextureView, TextureViewDescriptor,
};

/// Depth attachment sized to the surface. Recreated on resize.
pub struct DepthTexture {
    view: TextureView,
}

impl DepthTexture {
    pub const FORMAT: TextureFormat = TextureFormat::Depth32Float;

    pub fn new(device: &Device, config: &SurfaceConfiguration) -> Self {
        let texture = device.create_texture(&TextureDescriptor {
            label: Some("depth_texture"),
            size: Extent3d {
                width: config.width.max(1),
                height: config.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: Self::FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let view = texture.create_view(&TextureViewDescriptor::default());

        Self { view }
    }

    pub fn view(&self) -> &TextureView {
        &self.view
    }
}
