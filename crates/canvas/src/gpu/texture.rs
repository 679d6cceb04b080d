use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::textures::{TextureFiltering, TextureImage, TextureOptions};

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub(crate) struct GpuTexture {
    label: String,
    texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    size: (u32, u32),
    options: TextureOptions,
}

impl GpuTexture {
    /// 1x1 texture standing in for unbound units and textures still
    /// waiting for pixels.
    pub(crate) fn placeholder(device: &wgpu::Device, queue: &wgpu::Queue, label: &str) -> Self {
        let image = TextureImage::solid([0, 0, 0, 255]);
        Self::create(device, queue, label, &image, &TextureOptions::default())
    }

    pub(crate) fn create(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        image: &TextureImage,
        options: &TextureOptions,
    ) -> Self {
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: extent(image),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TEXTURE_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            image.rgba(),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            label: label.to_owned(),
            texture,
            view,
            sampler: create_sampler(device, options),
            size: (image.width(), image.height()),
            options: options.clone(),
        }
    }

    /// Replaces the pixels, reallocating only when the size changes.
    pub(crate) fn write(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &TextureImage,
        options: &TextureOptions,
    ) {
        if self.size != (image.width(), image.height()) {
            tracing::debug!(
                label = %self.label,
                width = image.width(),
                height = image.height(),
                "reallocating texture for new size"
            );
            let label = std::mem::take(&mut self.label);
            *self = Self::create(device, queue, &label, image, options);
            return;
        }

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.rgba(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(image.width() * 4),
                rows_per_image: Some(image.height()),
            },
            extent(image),
        );
        if self.options != *options {
            self.sampler = create_sampler(device, options);
            self.options = options.clone();
        }
    }
}

fn extent(image: &TextureImage) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: image.width(),
        height: image.height(),
        depth_or_array_layers: 1,
    }
}

fn create_sampler(device: &wgpu::Device, options: &TextureOptions) -> wgpu::Sampler {
    let address_mode = if options.repeat {
        wgpu::AddressMode::Repeat
    } else {
        wgpu::AddressMode::ClampToEdge
    };
    let filter = match options.filtering {
        TextureFiltering::Linear => wgpu::FilterMode::Linear,
        TextureFiltering::Nearest => wgpu::FilterMode::Nearest,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("canvas texture sampler"),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}
