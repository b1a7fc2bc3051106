//! ============================================================
//!            Multiplanar External Texture Decomposition
//! ============================================================
//! A logical external texture (video frames, possibly stored as
//! separate Y/UV hardware planes such as NV12) has no native backend
//! representation. Every external-texture var is lowered into:
//!
//! - `<name>_plane0` / `<name>_plane1` sampled 2-D textures, and
//! - `<name>_params`, a uniform buffer carrying plane count, the
//!   skip-conversion flag, the YUV-to-RGB matrix, gamma transfer
//!   parameters, gamut and coordinate-transform matrices, per-plane
//!   sample rects, the apparent size and the plane-1 coord factor.
//!
//! Uses are rewritten recursively: `textureDimensions` becomes
//! `apparentSize + (1, 1)`; `textureLoad` and
//! `textureSampleBaseClampToEdge` become calls to lazily synthesized,
//! memoized helpers; an argument to a user function expands into three
//! arguments in place, expanding the callee signature exactly once.
//!
//! A binding point with no map entry is a hard configuration failure,
//! detected during the scan phase before any mutation.

use crate::ir::builder::Builder;
use crate::ir::function::FuncId;
use crate::ir::instructions::{BinaryOp, BindingPoint, BuiltinFn, InstId, InstKind};
use crate::ir::module::Module;
use crate::ir::types::{
    AccessMode, AddressSpace, StructMember, TextureKind, TypeId, TypeKind,
};
use crate::ir::validator::validate_default;
use crate::ir::values::{ConstKind, ValueId};
use crate::passes::PassResult;
use crate::return_config_error;
use crate::return_validation_error;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Where the two extra declarations for one external texture land.
/// Plane 0 reuses the original texture's binding point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTextureBindings {
    pub plane1: BindingPoint,
    pub params: BindingPoint,
}

pub type MultiplanarMap = FxHashMap<BindingPoint, ExternalTextureBindings>;

// ExternalTextureParams member slots.
const NUM_PLANES: u32 = 0;
const DO_YUV_TO_RGB_ONLY: u32 = 1;
const YUV_TO_RGB_MATRIX: u32 = 2;
const GAMMA_DECODE: u32 = 3;
const GAMMA_ENCODE: u32 = 4;
const GAMUT_MATRIX: u32 = 5;
const SAMPLE_TRANSFORM: u32 = 6;
const LOAD_TRANSFORM: u32 = 7;
const SAMPLE_PLANE0_RECT_MIN: u32 = 8;
const SAMPLE_PLANE0_RECT_MAX: u32 = 9;
const SAMPLE_PLANE1_RECT_MIN: u32 = 10;
const SAMPLE_PLANE1_RECT_MAX: u32 = 11;
const APPARENT_SIZE: u32 = 12;
const PLANE1_COORD_FACTOR: u32 = 13;

// GammaTransferParams member slots: G A B C D E F padding.
const GAMMA_G: u32 = 0;
const GAMMA_A: u32 = 1;
const GAMMA_B: u32 = 2;
const GAMMA_C: u32 = 3;
const GAMMA_D: u32 = 4;
const GAMMA_E: u32 = 5;
const GAMMA_F: u32 = 6;

pub fn run(module: &mut Module, map: &MultiplanarMap) -> PassResult {
    validate_default(module)?;

    // Scan phase: every external-texture var must have a map entry
    // before anything is mutated.
    let mut targets: Vec<(InstId, BindingPoint, ExternalTextureBindings)> = Vec::new();
    for inst in module.root_vars() {
        let Some(result) = module.single_result(inst) else {
            continue;
        };
        let Some((_, store, _)) = module.types.pointer_info(module.value(result).ty) else {
            continue;
        };
        if *module.types.kind(store) != TypeKind::Texture(TextureKind::External) {
            continue;
        }

        let InstKind::Var(decl) = &module.inst(inst).kind else {
            continue;
        };
        let Some(point) = decl.binding else {
            return_validation_error!("external texture var has no binding point");
        };
        let Some(&bindings) = map.get(&point) else {
            return_config_error!(
                "no multiplanar binding mapping for @group({}) @binding({})",
                point.group,
                point.binding
            );
        };
        targets.push((inst, point, bindings));
    }
    if targets.is_empty() {
        return Ok(());
    }

    let mut state = Multiplanar::declare(module);
    for (inst, point, bindings) in targets {
        state.decompose_var(module, inst, point, bindings)?;
    }
    Ok(())
}

/// The three replacement values standing in for one external texture:
/// pointers at the var level, loaded texture/struct values below it.
#[derive(Clone, Copy)]
struct Replacement {
    plane0: ValueId,
    plane1: ValueId,
    params: ValueId,
}

struct Multiplanar {
    plane_ty: TypeId,
    gamma_ty: TypeId,
    params_ty: TypeId,
    gamma_fn: Option<FuncId>,
    load_fn: Option<FuncId>,
    sample_fn: Option<FuncId>,
    /// Callee signatures already expanded, keyed by parameter slot.
    expanded: FxHashSet<(FuncId, usize)>,
}

impl Multiplanar {
    fn declare(module: &mut Module) -> Multiplanar {
        let f32_ty = module.types.f32_();
        let u32_ty = module.types.u32_();
        let v2f = module.types.vector(f32_ty, 2);
        let v2u = module.types.vector(u32_ty, 2);
        let mat3x4 = module.types.matrix(f32_ty, 3, 4);
        let mat3x3 = module.types.matrix(f32_ty, 3, 3);
        let mat3x2 = module.types.matrix(f32_ty, 3, 2);

        let mut gamma_members: Vec<StructMember> = ["g", "a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|name| {
                let name = module.symbols.intern(name);
                StructMember { name, ty: f32_ty }
            })
            .collect();
        let padding = module.symbols.intern("padding");
        gamma_members.push(StructMember {
            name: padding,
            ty: u32_ty,
        });
        let gamma_name = module.symbols.unique("GammaTransferParams");
        let gamma_ty = module.types.declare_struct(gamma_name, gamma_members);

        let params_members = vec![
            ("numPlanes", u32_ty),
            ("doYuvToRgbConversionOnly", u32_ty),
            ("yuvToRgbConversionMatrix", mat3x4),
            ("gammaDecodeParams", gamma_ty),
            ("gammaEncodeParams", gamma_ty),
            ("gamutConversionMatrix", mat3x3),
            ("sampleTransform", mat3x2),
            ("loadTransform", mat3x2),
            ("samplePlane0RectMin", v2f),
            ("samplePlane0RectMax", v2f),
            ("samplePlane1RectMin", v2f),
            ("samplePlane1RectMax", v2f),
            ("apparentSize", v2u),
            ("plane1CoordFactor", v2f),
        ]
        .into_iter()
        .map(|(name, ty)| StructMember {
            name: module.symbols.intern(name),
            ty,
        })
        .collect();
        let params_name = module.symbols.unique("ExternalTextureParams");
        let params_ty = module.types.declare_struct(params_name, params_members);

        Multiplanar {
            plane_ty: module.types.sampled_2d(),
            gamma_ty,
            params_ty,
            gamma_fn: None,
            load_fn: None,
            sample_fn: None,
            expanded: FxHashSet::default(),
        }
    }

    // ========================================================
    // Declaration replacement
    // ========================================================

    fn decompose_var(
        &mut self,
        module: &mut Module,
        old_inst: InstId,
        point: BindingPoint,
        bindings: ExternalTextureBindings,
    ) -> PassResult {
        let old_result = module
            .single_result(old_inst)
            .unwrap_or_else(|| panic!("external texture var has no result"));
        let base = match module.value(old_result).name {
            Some(name) => module.symbols.resolve(name).to_string(),
            None => "tint_external_texture".to_string(),
        };

        let plane_ty = self.plane_ty;
        let params_ty = self.params_ty;
        let replacement = {
            let plane0_name = module.symbols.unique(&format!("{base}_plane0"));
            let plane1_name = module.symbols.unique(&format!("{base}_plane1"));
            let params_name = module.symbols.unique(&format!("{base}_params"));
            let mut builder = Builder::insert_before(module, old_inst);
            let plane0 = builder.var(
                Some(plane0_name),
                AddressSpace::Handle,
                AccessMode::Read,
                plane_ty,
                Some(point),
                None,
            );
            let plane1 = builder.var(
                Some(plane1_name),
                AddressSpace::Handle,
                AccessMode::Read,
                plane_ty,
                Some(bindings.plane1),
                None,
            );
            let params = builder.var(
                Some(params_name),
                AddressSpace::Uniform,
                AccessMode::Read,
                params_ty,
                Some(bindings.params),
                None,
            );
            Replacement {
                plane0,
                plane1,
                params,
            }
        };

        // The only legitimate direct use of a texture var is a load;
        // each one fans out into three loads feeding the rewritten
        // expression tree.
        for usage in module.value(old_result).uses().to_vec() {
            let user = usage.inst;
            if !matches!(module.inst(user).kind, InstKind::Load) {
                return_validation_error!("unsupported use of an external texture variable");
            }

            let loaded = {
                let mut builder = Builder::insert_before(module, user);
                Replacement {
                    plane0: builder.load(replacement.plane0),
                    plane1: builder.load(replacement.plane1),
                    params: builder.load(replacement.params),
                }
            };
            let result = module
                .single_result(user)
                .unwrap_or_else(|| panic!("load has no result"));
            self.replace_texture_value(module, result, loaded)?;
            module.destroy_instruction(user);
        }

        module.destroy_instruction(old_inst);
        Ok(())
    }

    // ========================================================
    // Use rewriting
    // ========================================================

    /// Rewrite every use of a loaded external-texture value against the
    /// replacement triple, recursing through user-function calls.
    fn replace_texture_value(
        &mut self,
        module: &mut Module,
        old: ValueId,
        replacement: Replacement,
    ) -> PassResult {
        for usage in module.value(old).uses().to_vec() {
            let user = usage.inst;
            match &module.inst(user).kind {
                InstKind::CoreBuiltinCall(BuiltinFn::TextureDimensions) => {
                    self.rewrite_dimensions(module, user, replacement);
                }
                InstKind::CoreBuiltinCall(BuiltinFn::TextureLoad) => {
                    self.rewrite_texture_load(module, user, replacement);
                }
                InstKind::CoreBuiltinCall(BuiltinFn::TextureSampleBaseClampToEdge) => {
                    self.rewrite_texture_sample(module, user, replacement);
                }
                InstKind::UserCall(callee) => {
                    let callee = *callee;
                    self.expand_call(module, user, callee, old, replacement)?;
                }
                _ => {
                    return_validation_error!("unsupported use of an external texture value")
                }
            }
        }
        Ok(())
    }

    /// `textureDimensions(t)` -> `params.apparentSize + (1, 1)`. The
    /// apparent size excludes a boundary row/column accounted for
    /// during capture.
    fn rewrite_dimensions(&mut self, module: &mut Module, inst: InstId, replacement: Replacement) {
        let u32_ty = module.types.u32_();
        let v2u = module.types.vector(u32_ty, 2);
        let sum = {
            let mut builder = Builder::insert_before(module, inst);
            let apparent = builder.access_member(v2u, replacement.params, APPARENT_SIZE);
            let one = builder.module.const_splat(v2u, ConstKind::U32(1));
            builder.binary(BinaryOp::Add, v2u, apparent, one)
        };
        let old_result = module
            .single_result(inst)
            .unwrap_or_else(|| panic!("textureDimensions has no result"));
        module.replace_all_uses_with(old_result, sum);
        module.destroy_instruction(inst);
    }

    fn rewrite_texture_load(&mut self, module: &mut Module, inst: InstId, replacement: Replacement) {
        let coords = module.inst(inst).operands[1];
        let helper = self.load_helper(module);
        let call = {
            let mut builder = Builder::insert_before(module, inst);
            builder.user_call_inst(
                helper,
                &[
                    replacement.plane0,
                    replacement.plane1,
                    replacement.params,
                    coords,
                ],
            )
        };
        replace_with(module, inst, call);
    }

    fn rewrite_texture_sample(
        &mut self,
        module: &mut Module,
        inst: InstId,
        replacement: Replacement,
    ) {
        let sampler = module.inst(inst).operands[1];
        let coords = module.inst(inst).operands[2];
        let helper = self.sample_helper(module);
        let call = {
            let mut builder = Builder::insert_before(module, inst);
            builder.user_call_inst(
                helper,
                &[
                    replacement.plane0,
                    replacement.plane1,
                    sampler,
                    replacement.params,
                    coords,
                ],
            )
        };
        replace_with(module, inst, call);
    }

    /// Expand one external-texture call argument into three, expanding
    /// the callee's signature (and rewriting its body) exactly once per
    /// parameter slot.
    fn expand_call(
        &mut self,
        module: &mut Module,
        call: InstId,
        callee: FuncId,
        old: ValueId,
        replacement: Replacement,
    ) -> PassResult {
        let position = module
            .inst(call)
            .operands
            .iter()
            .position(|&operand| operand == old)
            .unwrap_or_else(|| panic!("call does not reference the value being replaced"));

        if self.expanded.insert((callee, position)) {
            let old_param = module.function(callee).params[position];
            let base = match module.value(old_param).name {
                Some(name) => module.symbols.resolve(name).to_string(),
                None => "texture".to_string(),
            };
            let plane0_name = module.symbols.unique(&format!("{base}_plane0"));
            let plane1_name = module.symbols.unique(&format!("{base}_plane1"));
            let params_name = module.symbols.unique(&format!("{base}_params"));

            let plane0 = module.insert_function_param(callee, position, plane0_name, self.plane_ty);
            let plane1 =
                module.insert_function_param(callee, position + 1, plane1_name, self.plane_ty);
            let params =
                module.insert_function_param(callee, position + 2, params_name, self.params_ty);
            module.remove_function_param(callee, position + 3);

            self.replace_texture_value(
                module,
                old_param,
                Replacement {
                    plane0,
                    plane1,
                    params,
                },
            )?;
        }

        module.set_operand(call, position, replacement.plane0);
        module.insert_operand(call, position + 1, replacement.plane1);
        module.insert_operand(call, position + 2, replacement.params);
        Ok(())
    }

    // ========================================================
    // Helper synthesis
    // ========================================================

    fn gamma_helper(&mut self, module: &mut Module) -> FuncId {
        if let Some(existing) = self.gamma_fn {
            return existing;
        }

        let f32_ty = module.types.f32_();
        let v3f = module.types.vector(f32_ty, 3);
        let v3b = module.types.vector(module.types.bool_(), 3);

        let name = module.symbols.unique("tint_GammaCorrection");
        let function = module.new_function(name, v3f, None);
        let v_name = module.symbols.intern("v");
        let params_name = module.symbols.intern("params");
        let v = module.add_function_param(function, v_name, v3f);
        let params = module.add_function_param(function, params_name, self.gamma_ty);
        let entry = module.function(function).entry;

        // Piecewise transfer function, selected per component:
        //   |v| < D  ->  sign(v) * (C * |v| + F)
        //   else     ->  sign(v) * (pow(A * |v| + B, G) + E)
        let mut builder = Builder::append(module, entry);
        let abs_v = builder.builtin_call(v3f, BuiltinFn::Abs, &[v]);
        let sign_v = builder.builtin_call(v3f, BuiltinFn::Sign, &[v]);
        let members = [GAMMA_G, GAMMA_A, GAMMA_B, GAMMA_C, GAMMA_D, GAMMA_E, GAMMA_F]
            .map(|index| {
                let scalar = builder.access_member(f32_ty, params, index);
                builder.construct(v3f, &[scalar])
            });
        let [g, a, b, c, d, e, f] = members;

        let cond = builder.binary(BinaryOp::LessThan, v3b, abs_v, d);
        let scaled = builder.binary(BinaryOp::Multiply, v3f, c, abs_v);
        let offset = builder.binary(BinaryOp::Add, v3f, scaled, f);
        let linear = builder.binary(BinaryOp::Multiply, v3f, sign_v, offset);

        let pow_base_scaled = builder.binary(BinaryOp::Multiply, v3f, a, abs_v);
        let pow_base = builder.binary(BinaryOp::Add, v3f, pow_base_scaled, b);
        let powed = builder.builtin_call(v3f, BuiltinFn::Pow, &[pow_base, g]);
        let shifted = builder.binary(BinaryOp::Add, v3f, powed, e);
        let nonlinear = builder.binary(BinaryOp::Multiply, v3f, sign_v, shifted);

        let selected = builder.builtin_call(v3f, BuiltinFn::Select, &[nonlinear, linear, cond]);
        builder.ret(Some(selected));

        self.gamma_fn = Some(function);
        function
    }

    fn load_helper(&mut self, module: &mut Module) -> FuncId {
        if let Some(existing) = self.load_fn {
            return existing;
        }
        let gamma = self.gamma_helper(module);

        let f32_ty = module.types.f32_();
        let u32_ty = module.types.u32_();
        let v2f = module.types.vector(f32_ty, 2);
        let v2u = module.types.vector(u32_ty, 2);
        let v3f = module.types.vector(f32_ty, 3);
        let v4f = module.types.vector(f32_ty, 4);
        let bool_ty = module.types.bool_();
        let mat3x4 = module.types.matrix(f32_ty, 3, 4);
        let mat3x2 = module.types.matrix(f32_ty, 3, 2);

        let name = module.symbols.unique("tint_TextureLoadExternal");
        let function = module.new_function(name, v4f, None);
        let plane0 = add_param(module, function, "plane0", self.plane_ty);
        let plane1 = add_param(module, function, "plane1", self.plane_ty);
        let params = add_param(module, function, "params", self.params_ty);
        let coords = add_param(module, function, "coords", v2u);
        let entry = module.function(function).entry;

        let single_plane = module.new_block();
        let dual_plane = module.new_block();
        let color = {
            let mut builder = Builder::append(module, entry);
            let apparent = builder.access_member(v2u, params, APPARENT_SIZE);
            let clamped = builder.builtin_call(v2u, BuiltinFn::Min, &[coords, apparent]);

            // The load transform maps apparent coordinates onto the
            // physical plane-0 texel grid (crop / rotation baked in at
            // capture time).
            let transform = builder.access_member(mat3x2, params, LOAD_TRANSFORM);
            let clamped_f = builder.convert(v2f, clamped);
            let one_f = builder.module.const_f32(1.0);
            let homogeneous = builder.construct(v3f, &[clamped_f, one_f]);
            let transformed = builder.binary(BinaryOp::Multiply, v2f, transform, homogeneous);
            let plane0_coords = builder.convert(v2u, transformed);

            let color = builder.var(
                None,
                AddressSpace::Function,
                AccessMode::ReadWrite,
                v3f,
                None,
                None,
            );
            let num_planes = builder.access_member(u32_ty, params, NUM_PLANES);
            let one = builder.module.const_u32(1);
            let is_single = builder.binary(BinaryOp::Equal, bool_ty, num_planes, one);
            builder.if_(is_single, single_plane, Some(dual_plane), &[]);

            // Single plane: the RGBA8 plane is forwarded directly.
            {
                let mut arm = Builder::append(builder.module, single_plane);
                let texel =
                    arm.builtin_call(v4f, BuiltinFn::TextureLoad, &[plane0, plane0_coords]);
                let rgb = truncate_to_rgb(&mut arm, texel, f32_ty, v3f);
                arm.store(color, rgb);
                arm.exit_if(&[]);
            }

            // Dual plane: luma from plane 0, chroma from plane 1 at the
            // plane-1 coordinate scale, then the YUV-to-RGB matrix.
            {
                let mut arm = Builder::append(builder.module, dual_plane);
                let luma_texel =
                    arm.builtin_call(v4f, BuiltinFn::TextureLoad, &[plane0, plane0_coords]);
                let luma = arm.access_member(f32_ty, luma_texel, 0);

                let factor = arm.access_member(v2f, params, PLANE1_COORD_FACTOR);
                let scaled = arm.binary(BinaryOp::Multiply, v2f, transformed, factor);
                let chroma_coords = arm.convert(v2u, scaled);
                let chroma_texel =
                    arm.builtin_call(v4f, BuiltinFn::TextureLoad, &[plane1, chroma_coords]);
                let chroma_u = arm.access_member(f32_ty, chroma_texel, 0);
                let chroma_v = arm.access_member(f32_ty, chroma_texel, 1);

                let one_f = arm.module.const_f32(1.0);
                let yuv = arm.construct(v4f, &[luma, chroma_u, chroma_v, one_f]);
                let matrix = arm.access_member(mat3x4, params, YUV_TO_RGB_MATRIX);
                let rgb = arm.binary(BinaryOp::Multiply, v3f, yuv, matrix);
                arm.store(color, rgb);
                arm.exit_if(&[]);
            }

            color
        };

        self.emit_gamma_pipeline(module, entry, color, params, gamma);

        let mut builder = Builder::append(module, entry);
        let rgb = builder.load(color);
        let one_f = builder.module.const_f32(1.0);
        let rgba = builder.construct(v4f, &[rgb, one_f]);
        builder.ret(Some(rgba));

        self.load_fn = Some(function);
        function
    }

    fn sample_helper(&mut self, module: &mut Module) -> FuncId {
        if let Some(existing) = self.sample_fn {
            return existing;
        }
        let gamma = self.gamma_helper(module);

        let f32_ty = module.types.f32_();
        let v2f = module.types.vector(f32_ty, 2);
        let v3f = module.types.vector(f32_ty, 3);
        let v4f = module.types.vector(f32_ty, 4);
        let u32_ty = module.types.u32_();
        let bool_ty = module.types.bool_();
        let mat3x4 = module.types.matrix(f32_ty, 3, 4);
        let mat3x2 = module.types.matrix(f32_ty, 3, 2);
        let sampler_ty = module.types.sampler();

        let name = module.symbols.unique("tint_TextureSampleExternal");
        let function = module.new_function(name, v4f, None);
        let plane0 = add_param(module, function, "plane0", self.plane_ty);
        let plane1 = add_param(module, function, "plane1", self.plane_ty);
        let smp = add_param(module, function, "smp", sampler_ty);
        let params = add_param(module, function, "params", self.params_ty);
        let coords = add_param(module, function, "coords", v2f);
        let entry = module.function(function).entry;

        let single_plane = module.new_block();
        let dual_plane = module.new_block();
        let color = {
            let mut builder = Builder::append(module, entry);
            let transform = builder.access_member(mat3x2, params, SAMPLE_TRANSFORM);
            let one_f = builder.module.const_f32(1.0);
            let homogeneous = builder.construct(v3f, &[coords, one_f]);
            let transformed = builder.binary(BinaryOp::Multiply, v2f, transform, homogeneous);

            let p0_min = builder.access_member(v2f, params, SAMPLE_PLANE0_RECT_MIN);
            let p0_max = builder.access_member(v2f, params, SAMPLE_PLANE0_RECT_MAX);
            let p0_coords =
                builder.builtin_call(v2f, BuiltinFn::Clamp, &[transformed, p0_min, p0_max]);

            let color = builder.var(
                None,
                AddressSpace::Function,
                AccessMode::ReadWrite,
                v3f,
                None,
                None,
            );
            let num_planes = builder.access_member(u32_ty, params, NUM_PLANES);
            let one = builder.module.const_u32(1);
            let is_single = builder.binary(BinaryOp::Equal, bool_ty, num_planes, one);
            builder.if_(is_single, single_plane, Some(dual_plane), &[]);

            {
                let mut arm = Builder::append(builder.module, single_plane);
                let zero_f = arm.module.const_f32(0.0);
                let texel = arm.builtin_call(
                    v4f,
                    BuiltinFn::TextureSampleLevel,
                    &[plane0, smp, p0_coords, zero_f],
                );
                let rgb = truncate_to_rgb(&mut arm, texel, f32_ty, v3f);
                arm.store(color, rgb);
                arm.exit_if(&[]);
            }

            {
                let mut arm = Builder::append(builder.module, dual_plane);
                let zero_f = arm.module.const_f32(0.0);
                let luma_texel = arm.builtin_call(
                    v4f,
                    BuiltinFn::TextureSampleLevel,
                    &[plane0, smp, p0_coords, zero_f],
                );
                let luma = arm.access_member(f32_ty, luma_texel, 0);

                let p1_min = arm.access_member(v2f, params, SAMPLE_PLANE1_RECT_MIN);
                let p1_max = arm.access_member(v2f, params, SAMPLE_PLANE1_RECT_MAX);
                let p1_coords =
                    arm.builtin_call(v2f, BuiltinFn::Clamp, &[transformed, p1_min, p1_max]);
                let chroma_texel = arm.builtin_call(
                    v4f,
                    BuiltinFn::TextureSampleLevel,
                    &[plane1, smp, p1_coords, zero_f],
                );
                let chroma_u = arm.access_member(f32_ty, chroma_texel, 0);
                let chroma_v = arm.access_member(f32_ty, chroma_texel, 1);

                let one_f = arm.module.const_f32(1.0);
                let yuv = arm.construct(v4f, &[luma, chroma_u, chroma_v, one_f]);
                let matrix = arm.access_member(mat3x4, params, YUV_TO_RGB_MATRIX);
                let rgb = arm.binary(BinaryOp::Multiply, v3f, yuv, matrix);
                arm.store(color, rgb);
                arm.exit_if(&[]);
            }

            color
        };

        self.emit_gamma_pipeline(module, entry, color, params, gamma);

        let mut builder = Builder::append(module, entry);
        let rgb = builder.load(color);
        let one_f = builder.module.const_f32(1.0);
        let rgba = builder.construct(v4f, &[rgb, one_f]);
        builder.ret(Some(rgba));

        self.sample_fn = Some(function);
        function
    }

    /// The skip-flag-gated color pipeline shared by the load and sample
    /// helpers: gamma decode, gamut conversion, gamma encode.
    fn emit_gamma_pipeline(
        &mut self,
        module: &mut Module,
        entry: crate::ir::function::BlockId,
        color: ValueId,
        params: ValueId,
        gamma: FuncId,
    ) {
        let f32_ty = module.types.f32_();
        let u32_ty = module.types.u32_();
        let v3f = module.types.vector(f32_ty, 3);
        let bool_ty = module.types.bool_();
        let mat3x3 = module.types.matrix(f32_ty, 3, 3);
        let gamma_ty = self.gamma_ty;

        let convert_block = module.new_block();
        {
            let mut builder = Builder::append(module, entry);
            let flag = builder.access_member(u32_ty, params, DO_YUV_TO_RGB_ONLY);
            let zero = builder.module.const_u32(0);
            let full_pipeline = builder.binary(BinaryOp::Equal, bool_ty, flag, zero);
            builder.if_(full_pipeline, convert_block, None, &[]);
        }

        let mut builder = Builder::append(module, convert_block);
        let current = builder.load(color);
        let decode_params = builder.access_member(gamma_ty, params, GAMMA_DECODE);
        let decoded = builder.user_call(v3f, gamma, &[current, decode_params]);
        let gamut = builder.access_member(mat3x3, params, GAMUT_MATRIX);
        let converted = builder.binary(BinaryOp::Multiply, v3f, decoded, gamut);
        let encode_params = builder.access_member(gamma_ty, params, GAMMA_ENCODE);
        let encoded = builder.user_call(v3f, gamma, &[converted, encode_params]);
        builder.store(color, encoded);
        builder.exit_if(&[]);
    }
}

fn add_param(module: &mut Module, function: FuncId, name: &str, ty: TypeId) -> ValueId {
    let name = module.symbols.intern(name);
    module.add_function_param(function, name, ty)
}

/// First three components of a texel as a vec3.
fn truncate_to_rgb(
    builder: &mut Builder<'_>,
    texel: ValueId,
    f32_ty: TypeId,
    v3f: TypeId,
) -> ValueId {
    let r = builder.access_member(f32_ty, texel, 0);
    let g = builder.access_member(f32_ty, texel, 1);
    let b = builder.access_member(f32_ty, texel, 2);
    builder.construct(v3f, &[r, g, b])
}

/// Re-home an instruction's result onto its replacement and destroy
/// the original, so every existing use follows without rewriting.
fn replace_with(module: &mut Module, old: InstId, new: InstId) {
    if let Some(result) = module.detach_result(old) {
        module.attach_result(new, result);
    }
    module.destroy_instruction(old);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::display::print_module;
    use crate::ir::function::ShaderStage;
    use crate::errors::ErrorKind;

    fn mapping_for(point: BindingPoint) -> MultiplanarMap {
        let mut map = MultiplanarMap::default();
        map.insert(
            point,
            ExternalTextureBindings {
                plane1: BindingPoint::new(0, 1),
                params: BindingPoint::new(0, 2),
            },
        );
        map
    }

    /// Fragment entry loading and measuring one external texture.
    fn video_module() -> Module {
        let mut module = Module::new();
        let external = module.types.external_texture();
        let root = module.root_block;
        let var = {
            let name = module.symbols.intern("video");
            let mut builder = Builder::append(&mut module, root);
            builder.var(
                Some(name),
                AddressSpace::Handle,
                AccessMode::Read,
                external,
                Some(BindingPoint::new(0, 0)),
                None,
            )
        };

        let name = module.symbols.intern("main");
        let void = module.types.void();
        let u32_ty = module.types.u32_();
        let v2u = module.types.vector(u32_ty, 2);
        let v4f = {
            let f32_ty = module.types.f32_();
            module.types.vector(f32_ty, 4)
        };
        let func = module.new_function(name, void, Some(ShaderStage::Fragment));
        let entry = module.function(func).entry;
        let mut builder = Builder::append(&mut module, entry);
        let texture = builder.load(var);
        builder.builtin_call(v2u, BuiltinFn::TextureDimensions, &[texture]);
        let coords = builder.module.const_splat(v2u, ConstKind::U32(0));
        builder.builtin_call(v4f, BuiltinFn::TextureLoad, &[texture, coords]);
        builder.ret(None);
        module
    }

    #[test]
    fn test_var_decomposes_into_three_declarations() {
        let mut module = video_module();
        run(&mut module, &mapping_for(BindingPoint::new(0, 0))).unwrap();
        assert!(validate_default(&module).is_ok());

        let vars = module.root_vars();
        assert_eq!(vars.len(), 3);
        let printed = print_module(&module);
        assert!(printed.contains("%video_plane0:ptr<handle, texture_2d<f32>, read> = var @binding(0, 0)"));
        assert!(printed.contains("%video_plane1:ptr<handle, texture_2d<f32>, read> = var @binding(0, 1)"));
        assert!(printed.contains("%video_params:ptr<uniform, ExternalTextureParams, read> = var @binding(0, 2)"));
        assert!(!printed.contains("texture_external"));
    }

    #[test]
    fn test_builtins_rewritten_to_helpers() {
        let mut module = video_module();
        run(&mut module, &mapping_for(BindingPoint::new(0, 0))).unwrap();

        let printed = print_module(&module);
        // textureDimensions becomes apparentSize + (1, 1) on the loaded
        // params value.
        assert!(printed.contains("load %video_params"));
        assert!(printed.contains(", 12u"));
        assert!(printed.contains("add %"));
        // textureLoad becomes a helper call taking the triple; the
        // helper runs coordinates through the load transform.
        assert!(printed.contains("call tint_TextureLoadExternal(%"));
        assert!(printed.contains("fn tint_TextureLoadExternal("));
        assert!(printed.contains("access %params, 7u"));
        assert!(printed.contains("fn tint_GammaCorrection("));
    }

    #[test]
    fn test_helpers_are_memoized_across_sites() {
        let mut module = video_module();
        {
            let func = module.function_ids()[0];
            let entry = module.function(func).entry;
            let vars = module.root_vars();
            let var = module.single_result(vars[0]).unwrap();
            let u32_ty = module.types.u32_();
            let v2u = module.types.vector(u32_ty, 2);
            let v4f = {
                let f32_ty = module.types.f32_();
                module.types.vector(f32_ty, 4)
            };
            let terminator = module.block(entry).last().unwrap();
            let mut builder = Builder::insert_before(&mut module, terminator);
            let texture = builder.load(var);
            let coords = builder.module.const_splat(v2u, ConstKind::U32(3));
            builder.builtin_call(v4f, BuiltinFn::TextureLoad, &[texture, coords]);
        }

        run(&mut module, &mapping_for(BindingPoint::new(0, 0))).unwrap();

        // One shared load helper plus the gamma helper and main.
        let helper_count = module
            .function_ids()
            .into_iter()
            .filter(|&f| {
                module
                    .symbols
                    .resolve(module.function(f).name)
                    .starts_with("tint_TextureLoadExternal")
            })
            .count();
        assert_eq!(helper_count, 1);
    }

    #[test]
    fn test_sample_rewrites_through_sample_helper() {
        let mut module = Module::new();
        let external = module.types.external_texture();
        let sampler_ty = module.types.sampler();
        let root = module.root_block;
        let (var, smp) = {
            let video = module.symbols.intern("video");
            let linear = module.symbols.intern("linear");
            let mut builder = Builder::append(&mut module, root);
            let var = builder.var(
                Some(video),
                AddressSpace::Handle,
                AccessMode::Read,
                external,
                Some(BindingPoint::new(0, 0)),
                None,
            );
            let smp = builder.var(
                Some(linear),
                AddressSpace::Handle,
                AccessMode::Read,
                sampler_ty,
                Some(BindingPoint::new(0, 3)),
                None,
            );
            (var, smp)
        };

        let name = module.symbols.intern("main");
        let void = module.types.void();
        let f32_ty = module.types.f32_();
        let v2f = module.types.vector(f32_ty, 2);
        let v4f = module.types.vector(f32_ty, 4);
        let func = module.new_function(name, void, Some(ShaderStage::Fragment));
        let entry = module.function(func).entry;
        {
            let mut builder = Builder::append(&mut module, entry);
            let texture = builder.load(var);
            let sampler = builder.load(smp);
            let coords = builder
                .module
                .const_splat(v2f, ConstKind::F32(0.5f32.to_bits()));
            builder.builtin_call(
                v4f,
                BuiltinFn::TextureSampleBaseClampToEdge,
                &[texture, sampler, coords],
            );
            builder.ret(None);
        }

        run(&mut module, &mapping_for(BindingPoint::new(0, 0))).unwrap();
        assert!(validate_default(&module).is_ok());

        let printed = print_module(&module);
        assert!(printed.contains("call tint_TextureSampleExternal(%"));
        assert!(printed.contains("fn tint_TextureSampleExternal("));
    }

    #[test]
    fn test_user_call_expands_in_place() {
        let mut module = Module::new();
        let external = module.types.external_texture();
        let u32_ty = module.types.u32_();
        let v2u = module.types.vector(u32_ty, 2);

        let callee = {
            let name = module.symbols.intern("measure");
            let func = module.new_function(name, v2u, None);
            let t = module.symbols.intern("t");
            let param = module.add_function_param(func, t, external);
            let entry = module.function(func).entry;
            let mut builder = Builder::append(&mut module, entry);
            let dims = builder.builtin_call(v2u, BuiltinFn::TextureDimensions, &[param]);
            builder.ret(Some(dims));
            func
        };

        let root = module.root_block;
        let var = {
            let name = module.symbols.intern("video");
            let mut builder = Builder::append(&mut module, root);
            builder.var(
                Some(name),
                AddressSpace::Handle,
                AccessMode::Read,
                external,
                Some(BindingPoint::new(0, 0)),
                None,
            )
        };

        let name = module.symbols.intern("main");
        let void = module.types.void();
        let func = module.new_function(name, void, Some(ShaderStage::Fragment));
        let entry = module.function(func).entry;
        let call = {
            let mut builder = Builder::append(&mut module, entry);
            let texture = builder.load(var);
            let call = builder.user_call_inst(callee, &[texture]);
            builder.ret(None);
            call
        };

        run(&mut module, &mapping_for(BindingPoint::new(0, 0))).unwrap();
        assert!(validate_default(&module).is_ok());

        // Three arguments in the original position, three parameters.
        assert_eq!(module.inst(call).operands.len(), 3);
        assert_eq!(module.function(callee).params.len(), 3);
        let printed = print_module(&module);
        assert!(printed.contains("fn measure(%t_plane0:texture_2d<f32>, %t_plane1:texture_2d<f32>, %t_params:ExternalTextureParams) -> vec2<u32>"));
    }

    #[test]
    fn test_nested_user_calls_expand_at_every_depth() {
        let mut module = Module::new();
        let external = module.types.external_texture();
        let u32_ty = module.types.u32_();
        let v2u = module.types.vector(u32_ty, 2);

        let inner = {
            let name = module.symbols.intern("inner_measure");
            let func = module.new_function(name, v2u, None);
            let t = module.symbols.intern("t");
            let param = module.add_function_param(func, t, external);
            let entry = module.function(func).entry;
            let mut builder = Builder::append(&mut module, entry);
            let dims = builder.builtin_call(v2u, BuiltinFn::TextureDimensions, &[param]);
            builder.ret(Some(dims));
            func
        };

        let outer = {
            let name = module.symbols.intern("outer_measure");
            let func = module.new_function(name, v2u, None);
            let tex = module.symbols.intern("tex");
            let param = module.add_function_param(func, tex, external);
            let entry = module.function(func).entry;
            let mut builder = Builder::append(&mut module, entry);
            let dims = builder.user_call(v2u, inner, &[param]);
            builder.ret(Some(dims));
            func
        };

        let root = module.root_block;
        let var = {
            let name = module.symbols.intern("video");
            let mut builder = Builder::append(&mut module, root);
            builder.var(
                Some(name),
                AddressSpace::Handle,
                AccessMode::Read,
                external,
                Some(BindingPoint::new(0, 0)),
                None,
            )
        };

        let name = module.symbols.intern("main");
        let void = module.types.void();
        let func = module.new_function(name, void, Some(ShaderStage::Fragment));
        let entry = module.function(func).entry;
        {
            let mut builder = Builder::append(&mut module, entry);
            let texture = builder.load(var);
            builder.user_call(v2u, outer, &[texture]);
            builder.ret(None);
        }

        run(&mut module, &mapping_for(BindingPoint::new(0, 0))).unwrap();
        assert!(validate_default(&module).is_ok());

        // Both levels of the call chain carry the expanded triple.
        assert_eq!(module.function(outer).params.len(), 3);
        assert_eq!(module.function(inner).params.len(), 3);
        let printed = print_module(&module);
        assert!(printed.contains(
            "fn inner_measure(%t_plane0:texture_2d<f32>, %t_plane1:texture_2d<f32>, %t_params:ExternalTextureParams) -> vec2<u32>"
        ));
        assert!(printed.contains("call inner_measure(%tex_plane0, %tex_plane1, %tex_params)"));
        assert!(printed.contains("call outer_measure(%"));
        assert!(!printed.contains("texture_external"));
    }

    #[test]
    fn test_missing_mapping_fails_before_mutation() {
        let mut module = video_module();
        let before = print_module(&module);

        let error = run(&mut module, &MultiplanarMap::default()).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Configuration);
        assert!(error.msg.contains("@group(0) @binding(0)"));
        assert_eq!(before, print_module(&module));
    }

    #[test]
    fn test_no_external_textures_is_a_no_op() {
        let mut module = Module::new();
        let name = module.symbols.intern("main");
        let void = module.types.void();
        let func = module.new_function(name, void, Some(ShaderStage::Fragment));
        let entry = module.function(func).entry;
        Builder::append(&mut module, entry).ret(None);

        let before = print_module(&module);
        run(&mut module, &mapping_for(BindingPoint::new(0, 0))).unwrap();
        assert_eq!(before, print_module(&module));
    }
}
