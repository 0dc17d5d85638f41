//! Render-object pools under long load/unload sequences

use pearl_engine::foundation::math::{Vec2, Vec3, Vec4};
use pearl_engine::render::texture_registry::{TextureId, TextureInfo, TextureState};
use pearl_engine::render::{
    ModelPool, PoolError, PoolKind, QuadDesc, QuadLoadInfo, RenderError, RenderObjectHandle,
    RenderObjectLoadInfo, RenderObjects,
};

fn quad_at(z: f32) -> QuadDesc {
    QuadDesc {
        translation: Vec3::new(0.0, 0.0, z),
        dimensions: Vec2::new(1.0, 1.0),
        uv_extent: Vec2::new(1.0, 1.0),
        color: Vec4::new(1.0, 1.0, 1.0, 1.0),
    }
}

fn still() -> TextureState {
    TextureState::new(TextureId::MISSING, &TextureInfo::missing(), 0, 0).unwrap()
}

/// Small deterministic generator for operation sequences
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }
}

fn assert_draw_indices_consistent(pool: &ModelPool) {
    let mut active = 0;
    for model in 0..pool.capacity() {
        if pool.is_active(model) {
            active += 1;
            let position = pool.draw_info_index(model).unwrap();
            assert_eq!(pool.draw_infos()[position].model_index as usize, model);
        } else {
            assert_eq!(pool.draw_info_index(model), None);
        }
    }
    assert_eq!(pool.draw_infos().len(), active);
    assert_eq!(pool.active_count(), active);
}

fn assert_paint_order(pool: &ModelPool) {
    let depths: Vec<f32> = pool
        .draw_infos()
        .iter()
        .map(|draw| pool.transforms()[draw.model_index as usize].current.translation.z)
        .collect();
    assert!(depths.windows(2).all(|pair| pair[0] <= pair[1]), "out of order: {:?}", depths);
}

#[test]
fn test_random_load_unload_keeps_indices_consistent() {
    let mut pool = ModelPool::new(PoolKind::Main, 16, 32);
    let mut rng = Lcg(7);
    let mut loaded = Vec::new();
    for _ in 0..500 {
        if loaded.is_empty() || rng.next() % 3 != 0 {
            let z = (rng.next() % 5) as f32 - 2.0;
            match pool.load(&quad_at(z), still()) {
                Ok(model) => loaded.push(model),
                Err(PoolError::PoolExhausted { capacity, .. }) => assert_eq!(capacity, 32),
                Err(e) => panic!("unexpected error {e}"),
            }
        } else {
            let victim = loaded.swap_remove(rng.next() as usize % loaded.len());
            assert!(pool.unload(victim).unwrap());
        }
        assert_draw_indices_consistent(&pool);
        assert_paint_order(&pool);
    }
    for draw in pool.draw_infos() {
        assert_eq!(draw.first_instance as usize, 16 + draw.model_index as usize);
    }
}

#[test]
fn test_sorted_inserts_stay_sorted_and_ties_keep_order() {
    let mut pool = ModelPool::new(PoolKind::Main, 0, 16);
    let depths = [-2.0, -1.0, -1.0, 0.0, 0.0, 0.0, 3.0];
    let models: Vec<usize> = depths.iter().map(|&z| pool.load(&quad_at(z), still()).unwrap()).collect();
    let order: Vec<usize> = pool.draw_infos().iter().map(|draw| draw.model_index as usize).collect();
    assert_eq!(order, models);

    let late = pool.load(&quad_at(0.0), still()).unwrap();
    let order: Vec<usize> = pool.draw_infos().iter().map(|draw| draw.model_index as usize).collect();
    assert_eq!(order, vec![models[0], models[1], models[2], models[3], models[4], models[5], late, models[6]]);
    assert_paint_order(&pool);
}

#[test]
fn test_sixty_fifth_object_rejected_by_full_pool() {
    let mut objects = RenderObjects::with_capacities([64, 0, 0], 128);
    let info = RenderObjectLoadInfo {
        position: Vec3::zeros(),
        quads: vec![QuadLoadInfo::new("missing", Vec2::new(1.0, 1.0))],
    };
    let handles: Vec<RenderObjectHandle> = (0..64).map(|_| objects.load(&info, 0).unwrap()).collect();
    let before = objects.pool(PoolKind::Main).draw_infos().to_vec();

    assert!(matches!(
        objects.load(&info, 0),
        Err(RenderError::Pool(PoolError::PoolExhausted { kind: PoolKind::Main, capacity: 64 }))
    ));
    assert_eq!(objects.len(), 64);
    assert_eq!(objects.pool(PoolKind::Main).active_count(), 64);
    assert_eq!(objects.pool(PoolKind::Main).draw_infos(), before.as_slice());

    objects.unload(handles[10]).unwrap();
    assert!(objects.load(&info, 0).is_ok());
    assert_eq!(objects.pool(PoolKind::Main).active_count(), 64);
}

#[test]
fn test_debug_quads_land_after_main_models() {
    let mut objects = RenderObjects::with_capacities([8, 4, 2], 4);
    let info = RenderObjectLoadInfo {
        position: Vec3::new(2.0, 3.0, 0.0),
        quads: vec![
            QuadLoadInfo::new("missing", Vec2::new(1.0, 1.0)),
            QuadLoadInfo::new("missing", Vec2::new(0.5, 0.5)).in_pool(PoolKind::Debug),
        ],
    };
    let handle = objects.load(&info, 0).unwrap();
    let (pool, model) = objects.quad_model(handle, 1).unwrap().unwrap();
    assert_eq!(pool, PoolKind::Debug);
    let draw = objects.pool(PoolKind::Debug).draw_infos()[0];
    assert_eq!(draw.first_instance as usize, 8 + model);
    assert_eq!(objects.total_models(), 14);
}
