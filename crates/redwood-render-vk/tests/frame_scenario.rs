// SPDX-License-Identifier: CEPL-1.0
//! Two-GPU selection followed by a mid-run resize, driven without a driver.
use ash::{khr::swapchain, vk};
use redwood_render::RenderSize;
use redwood_render_vk::{
    choose_extent, select_physical_device, DeviceCandidate, FramePacer, FrameStep,
    QueueFamilySupport, Suitability,
};

fn discrete(name: &str) -> DeviceCandidate {
    DeviceCandidate {
        name: name.to_owned(),
        device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
        geometry_shader: true,
        queue_families: vec![
            QueueFamilySupport {
                graphics: true,
                present: false,
            },
            QueueFamilySupport {
                graphics: false,
                present: true,
            },
        ],
        extensions: vec![swapchain::NAME.to_owned()],
        format_count: 3,
        present_mode_count: 2,
    }
}

fn free_size_caps() -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        min_image_count: 2,
        current_extent: vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        },
        min_image_extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
        max_image_extent: vk::Extent2D {
            width: 8192,
            height: 8192,
        },
        ..Default::default()
    }
}

fn draw(p: &mut FramePacer) -> FrameStep {
    p.retire_current();
    let step = p.begin().unwrap();
    if let FrameStep::Record { .. } = step {
        p.submitted();
    }
    step
}

#[test]
fn second_gpu_then_resize() {
    // First GPU has no present-capable family.
    let mut first = discrete("gpu0");
    first.queue_families.truncate(1);
    let second = discrete("gpu1");
    assert!(!first.suitability().contains(Suitability::QUEUE_FAMILIES));

    let picked = select_physical_device(&[first, second.clone()]).unwrap();
    assert_eq!(picked, 1);
    let families = second.queue_family_indices().unwrap();
    assert_eq!((families.graphics, families.present), (0, 1));

    let caps = free_size_caps();
    let mut pacer = FramePacer::new(RenderSize::new(1280, 720));
    assert_eq!(draw(&mut pacer), FrameStep::Record { slot: 0 });
    assert_eq!(draw(&mut pacer), FrameStep::Record { slot: 1 });

    pacer.resize(RenderSize::new(800, 600));

    // Next frame only rebuilds.
    let FrameStep::Rebuild(size) = draw(&mut pacer) else {
        panic!("expected a rebuild after resize");
    };
    let extent = choose_extent(&caps, size);
    assert_eq!((extent.width, extent.height), (800, 600));
    assert_eq!(pacer.submitted_frames(), 2);

    // The one after draws normally at the new size.
    assert_eq!(draw(&mut pacer), FrameStep::Record { slot: 0 });
    assert_eq!(pacer.size(), RenderSize::new(800, 600));
    assert_eq!(pacer.submitted_frames(), 3);
}
