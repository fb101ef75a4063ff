// Scenes - what gets drawn inside the render pass
//
// Each scene is fixed geometry plus the shader pair that draws it. `Clear`
// records nothing beyond the render pass clear.

use crate::backend::pipeline::VertexLayout;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use serde::Deserialize;
use std::mem::{offset_of, size_of};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scene {
    Clear,
    Triangle,
    #[default]
    TexturedQuad,
}

/// Position + per-vertex color.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: Vec2,
    pub color: Vec3,
}

/// Homogeneous position + texture coordinate.
///
/// Plain arrays rather than `Vec4`, whose 16-byte alignment would pad the
/// struct past the 24 bytes the shader reads.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: [f32; 4],
    pub tex_coord: [f32; 2],
}

pub static TRIANGLE_VERTICES: [ColorVertex; 3] = [
    ColorVertex {
        position: Vec2::new(0.0, -0.5),
        color: Vec3::new(1.0, 0.0, 0.0),
    },
    ColorVertex {
        position: Vec2::new(0.5, 0.5),
        color: Vec3::new(0.0, 1.0, 0.0),
    },
    ColorVertex {
        position: Vec2::new(-0.5, 0.5),
        color: Vec3::new(0.0, 0.0, 1.0),
    },
];

const fn textured(x: f32, y: f32, u: f32, v: f32) -> TexturedVertex {
    TexturedVertex {
        position: [x, y, 0.0, 1.0],
        tex_coord: [u, v],
    }
}

/// Two triangles covering most of the viewport.
pub static QUAD_VERTICES: [TexturedVertex; 6] = [
    textured(-0.9, -0.9, 0.0, 0.0),
    textured(-0.9, 0.9, 0.0, 1.0),
    textured(0.9, -0.9, 1.0, 0.0),
    textured(0.9, 0.9, 1.0, 1.0),
    textured(0.9, -0.9, 1.0, 0.0),
    textured(-0.9, 0.9, 0.0, 1.0),
];

impl Scene {
    /// File stem of the compiled shader pair, `None` for the clear scene.
    pub fn shader_stem(self) -> Option<&'static str> {
        match self {
            Self::Clear => None,
            Self::Triangle => Some("triangle"),
            Self::TexturedQuad => Some("quad"),
        }
    }

    pub fn uses_texture(self) -> bool {
        self == Self::TexturedQuad
    }

    /// Raw vertex bytes uploaded to the vertex buffer.
    pub fn vertex_bytes(self) -> &'static [u8] {
        match self {
            Self::Clear => &[],
            Self::Triangle => bytemuck::cast_slice(&TRIANGLE_VERTICES),
            Self::TexturedQuad => bytemuck::cast_slice(&QUAD_VERTICES),
        }
    }

    pub fn vertex_count(self) -> u32 {
        match self {
            Self::Clear => 0,
            Self::Triangle => TRIANGLE_VERTICES.len() as u32,
            Self::TexturedQuad => QUAD_VERTICES.len() as u32,
        }
    }

    pub fn vertex_layout(self) -> Option<VertexLayout> {
        match self {
            Self::Clear => None,
            Self::Triangle => Some(VertexLayout::new(
                size_of::<ColorVertex>(),
                &[
                    (vk::Format::R32G32_SFLOAT, offset_of!(ColorVertex, position)),
                    (vk::Format::R32G32B32_SFLOAT, offset_of!(ColorVertex, color)),
                ],
            )),
            Self::TexturedQuad => Some(VertexLayout::new(
                size_of::<TexturedVertex>(),
                &[
                    (vk::Format::R32G32B32A32_SFLOAT, offset_of!(TexturedVertex, position)),
                    (vk::Format::R32G32_SFLOAT, offset_of!(TexturedVertex, tex_coord)),
                ],
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_structs_are_tightly_packed() {
        assert_eq!(size_of::<ColorVertex>(), 20);
        assert_eq!(size_of::<TexturedVertex>(), 24);
    }

    #[test]
    fn vertex_counts_match_uploaded_bytes() {
        for scene in [Scene::Clear, Scene::Triangle, Scene::TexturedQuad] {
            let stride = scene.vertex_layout().map_or(0, |layout| layout.stride as usize);
            assert_eq!(
                scene.vertex_bytes().len(),
                stride * scene.vertex_count() as usize,
                "{scene:?}"
            );
        }
    }

    #[test]
    fn clear_scene_draws_nothing() {
        assert_eq!(Scene::Clear.vertex_count(), 0);
        assert!(Scene::Clear.shader_stem().is_none());
        assert!(Scene::Clear.vertex_layout().is_none());
        assert!(!Scene::Clear.uses_texture());
    }

    #[test]
    fn quad_layout_matches_shader_inputs() {
        let layout = Scene::TexturedQuad.vertex_layout().unwrap();
        assert_eq!(layout.stride, 24);
        assert_eq!(layout.attributes[0].format, vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(layout.attributes[1].offset, 16);
        assert_eq!(Scene::TexturedQuad.shader_stem(), Some("quad"));
    }

    #[test]
    fn triangle_layout_matches_shader_inputs() {
        let layout = Scene::Triangle.vertex_layout().unwrap();
        assert_eq!(layout.stride, 20);
        assert_eq!(layout.attributes[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(layout.attributes[1].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(layout.attributes[1].offset, 8);
    }

    #[test]
    fn quad_spans_the_texture_and_stays_inside_clip_space() {
        for vertex in QUAD_VERTICES {
            assert!(vertex.position[0].abs() <= 1.0 && vertex.position[1].abs() <= 1.0);
            assert_eq!(vertex.position[3], 1.0);
            assert!(vertex.tex_coord.iter().all(|&c| c == 0.0 || c == 1.0));
        }
        let corners: Vec<_> = QUAD_VERTICES.iter().map(|v| v.tex_coord).collect();
        for corner in [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]] {
            assert!(corners.contains(&corner));
        }
    }

    #[test]
    fn scene_names_deserialize_in_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            scene: Scene,
        }
        let parsed: Wrapper = toml::from_str("scene = \"textured_quad\"").unwrap();
        assert_eq!(parsed.scene, Scene::TexturedQuad);
        let parsed: Wrapper = toml::from_str("scene = \"triangle\"").unwrap();
        assert_eq!(parsed.scene, Scene::Triangle);
        assert_eq!(Scene::default(), Scene::TexturedQuad);
    }
}
