//! Dynamic loader for the NVIDIA video effects runtime.
//!
//! The effects library and the CUDA driver are both resolved at runtime with
//! `dlopen`/`dlsym` into a function-pointer table behind a `OnceLock`, so the
//! crate links cleanly on machines without the SDK installed and failure to
//! find it surfaces as a recoverable [`MatteError::Unavailable`] instead of a
//! loader error at process start.
//!
//! Library discovery order: the directory named by `NV_VIDEO_EFFECTS_PATH`,
//! then the default SDK install prefix, then the system loader search path.

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use tracing::{debug, warn};

use matte_core::{MatteError, Result, Size, TextureFormat, TextureHandle};

use crate::api::{AcceleratorApi, EffectHandle, ImageHandle, StreamHandle};
use crate::status::{check_provider, check_resource};

unsafe extern "C" {
    fn dlopen(filename: *const c_char, flags: i32) -> *mut c_void;
    fn dlerror() -> *const c_char;
    fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
}

const RTLD_NOW: i32 = 2;
const RTLD_GLOBAL: i32 = 0x100;

/// Environment variable naming the effects SDK directory.
pub const SDK_PATH_ENV: &str = "NV_VIDEO_EFFECTS_PATH";

/// Default SDK install prefix checked after the environment override.
const SDK_DEFAULT_DIR: &str = "/usr/local/VideoFX/lib";

const VFX_SONAMES: [&str; 2] = ["libVideoFX.so", "libNVVideoEffects.so"];
const CV_SONAMES: [&str; 2] = ["libNVCVImage.so", "libVideoFX.so"];
const CUDA_SONAMES: [&str; 2] = ["libcuda.so.1", "libcuda.so"];

type NvHandle = *mut c_void;
type NvImagePtr = *mut c_void;
type CuStream = *mut c_void;

// NvCVImage pixel formats and component types used by this pipeline.
const NVCV_A: i32 = 2;
const NVCV_RGBA: i32 = 6;
const NVCV_U8: i32 = 1;
const NVCV_INTERLEAVED: u32 = 0;
const NVCV_GPU: u32 = 1;

// Effect parameter selectors.
const PARAM_SRC_IMAGE: &CStr = c"SrcImg0";
const PARAM_DST_IMAGE: &CStr = c"DstImg0";
const PARAM_MODEL_DIR: &CStr = c"ModelDir";
const PARAM_CUDA_STREAM: &CStr = c"CudaStream";
const PARAM_MODE: &CStr = c"Mode";

struct VfxApiTable {
    vfx_create_effect: unsafe extern "C" fn(*const c_char, *mut NvHandle) -> i32,
    vfx_destroy_effect: unsafe extern "C" fn(NvHandle) -> i32,
    vfx_set_image: unsafe extern "C" fn(NvHandle, *const c_char, NvImagePtr) -> i32,
    vfx_set_string: unsafe extern "C" fn(NvHandle, *const c_char, *const c_char) -> i32,
    vfx_set_u32: unsafe extern "C" fn(NvHandle, *const c_char, u32) -> i32,
    vfx_set_cuda_stream: unsafe extern "C" fn(NvHandle, *const c_char, CuStream) -> i32,
    vfx_load: unsafe extern "C" fn(NvHandle) -> i32,
    vfx_run: unsafe extern "C" fn(NvHandle, i32) -> i32,
    vfx_stream_create: unsafe extern "C" fn(*mut CuStream) -> i32,
    vfx_stream_destroy: unsafe extern "C" fn(CuStream) -> i32,
    cv_image_create:
        unsafe extern "C" fn(u32, u32, i32, i32, u32, u32, u32, *mut NvImagePtr) -> i32,
    cv_image_destroy: unsafe extern "C" fn(NvImagePtr) -> i32,
    cv_transfer: unsafe extern "C" fn(NvImagePtr, NvImagePtr, f32, CuStream, NvImagePtr) -> i32,
    cv_error_string: unsafe extern "C" fn(i32) -> *const c_char,
    cu_stream_synchronize: unsafe extern "C" fn(CuStream) -> i32,
}

// SAFETY: the table holds only code pointers into libraries that stay loaded
// for the lifetime of the process.
unsafe impl Send for VfxApiTable {}
unsafe impl Sync for VfxApiTable {}

static VFX_API: OnceLock<std::result::Result<VfxApiTable, String>> = OnceLock::new();

fn dl_error() -> String {
    // SAFETY: dlerror returns a thread-local C string or null.
    unsafe {
        let p = dlerror();
        if p.is_null() {
            "unknown dynamic loader error".to_string()
        } else {
            CStr::from_ptr(p).to_string_lossy().to_string()
        }
    }
}

fn try_open(path: &Path) -> Option<*mut c_void> {
    let cpath = CString::new(path.as_os_str().as_encoded_bytes()).ok()?;
    // SAFETY: NUL-terminated path and valid dlopen flags.
    let handle = unsafe { dlopen(cpath.as_ptr(), RTLD_NOW | RTLD_GLOBAL) };
    if handle.is_null() {
        debug!(path = %path.display(), error = %dl_error(), "library candidate not loadable");
        None
    } else {
        debug!(path = %path.display(), "loaded accelerator library");
        Some(handle)
    }
}

fn open_library(sonames: &[&str]) -> std::result::Result<*mut c_void, String> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Ok(dir) = std::env::var(SDK_PATH_ENV) {
        if !dir.is_empty() {
            dirs.push(PathBuf::from(dir));
        }
    }
    dirs.push(PathBuf::from(SDK_DEFAULT_DIR));

    for dir in &dirs {
        for soname in sonames {
            if let Some(handle) = try_open(&dir.join(soname)) {
                return Ok(handle);
            }
        }
    }
    // Fall back to the loader search path.
    for soname in sonames {
        if let Some(handle) = try_open(Path::new(soname)) {
            return Ok(handle);
        }
    }
    Err(format!(
        "dlopen({}) failed: {} (set {SDK_PATH_ENV} to the SDK lib directory)",
        sonames.join("|"),
        dl_error()
    ))
}

fn load_symbol<T>(handle: *mut c_void, name: &'static str) -> std::result::Result<T, String> {
    let cname = CString::new(name).map_err(|_| format!("invalid symbol name: {name}"))?;
    // SAFETY: handle is a valid dlopen handle and cname is a valid C symbol name.
    let ptr = unsafe { dlsym(handle, cname.as_ptr()) };
    if ptr.is_null() {
        Err(format!("dlsym({name}) failed: {}", dl_error()))
    } else {
        // SAFETY: ptr points to a function with signature T.
        Ok(unsafe { std::mem::transmute_copy(&ptr) })
    }
}

fn init_vfx_api() -> std::result::Result<VfxApiTable, String> {
    let vfx = open_library(&VFX_SONAMES)?;
    let cv = open_library(&CV_SONAMES)?;
    let cuda = open_library(&CUDA_SONAMES)?;

    Ok(VfxApiTable {
        vfx_create_effect: load_symbol(vfx, "NvVFX_CreateEffect")?,
        vfx_destroy_effect: load_symbol(vfx, "NvVFX_DestroyEffect")?,
        vfx_set_image: load_symbol(vfx, "NvVFX_SetImage")?,
        vfx_set_string: load_symbol(vfx, "NvVFX_SetString")?,
        vfx_set_u32: load_symbol(vfx, "NvVFX_SetU32")?,
        vfx_set_cuda_stream: load_symbol(vfx, "NvVFX_SetCudaStream")?,
        vfx_load: load_symbol(vfx, "NvVFX_Load")?,
        vfx_run: load_symbol(vfx, "NvVFX_Run")?,
        vfx_stream_create: load_symbol(vfx, "NvVFX_CudaStreamCreate")?,
        vfx_stream_destroy: load_symbol(vfx, "NvVFX_CudaStreamDestroy")?,
        cv_image_create: load_symbol(cv, "NvCVImage_Create")?,
        cv_image_destroy: load_symbol(cv, "NvCVImage_Destroy")?,
        cv_transfer: load_symbol(cv, "NvCVImage_Transfer")?,
        cv_error_string: load_symbol(cv, "NvCV_GetErrorStringFromCode")?,
        cu_stream_synchronize: load_symbol(cuda, "cuStreamSynchronize")?,
    })
}

fn vfx_api() -> Result<&'static VfxApiTable> {
    let api = VFX_API.get_or_init(init_vfx_api);
    api.as_ref().map_err(|err| {
        MatteError::Unavailable(format!(
            "video effects runtime not loadable: {err}. \
Install the NVIDIA Video Effects SDK and the NVIDIA driver."
        ))
    })
}

/// Raw library pointer that can live in a shared handle registry.
struct RawPtr(*mut c_void);

// SAFETY: the registry hands pointers back to accelerator calls only; the
// library's own thread requirements are met by the callers' locking.
unsafe impl Send for RawPtr {}

fn nvcv_format(format: TextureFormat) -> i32 {
    match format {
        TextureFormat::Rgba8 => NVCV_RGBA,
        TextureFormat::Alpha8 => NVCV_A,
    }
}

/// [`AcceleratorApi`] backed by the dynamically loaded effects runtime.
///
/// Library object pointers never cross the trait boundary; each is parked in
/// a registry under a minted id and looked up per call.
pub struct VfxAccelerator {
    effects: Mutex<HashMap<u64, RawPtr>>,
    images: Mutex<HashMap<u64, RawPtr>>,
    streams: Mutex<HashMap<u64, RawPtr>>,
    next_id: AtomicU64,
}

impl VfxAccelerator {
    /// Resolve the runtime libraries, failing with
    /// [`MatteError::Unavailable`] when they cannot be loaded.
    pub fn load() -> Result<Self> {
        vfx_api()?;
        Ok(Self {
            effects: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn mint(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn effect_ptr(&self, effect: EffectHandle) -> Result<NvHandle> {
        self.effects
            .lock()
            .unwrap()
            .get(&effect.0)
            .map(|p| p.0)
            .ok_or_else(|| {
                MatteError::InvariantViolation(format!("unknown effect handle {}", effect.0))
            })
    }

    fn image_ptr(&self, image: ImageHandle) -> Result<NvImagePtr> {
        self.images
            .lock()
            .unwrap()
            .get(&image.0)
            .map(|p| p.0)
            .ok_or_else(|| {
                MatteError::InvariantViolation(format!("unknown image handle {}", image.0))
            })
    }

    fn stream_ptr(&self, stream: StreamHandle) -> Result<CuStream> {
        self.streams
            .lock()
            .unwrap()
            .get(&stream.0)
            .map(|p| p.0)
            .ok_or_else(|| {
                MatteError::InvariantViolation(format!("unknown stream handle {}", stream.0))
            })
    }

    fn create_image(&self, size: Size, format: TextureFormat) -> Result<ImageHandle> {
        let api = vfx_api()?;
        let mut ptr: NvImagePtr = std::ptr::null_mut();
        // SAFETY: out pointer is valid; dimensions and format selectors are
        // in the library's documented ranges.
        let rc = unsafe {
            (api.cv_image_create)(
                size.width,
                size.height,
                nvcv_format(format),
                NVCV_U8,
                NVCV_INTERLEAVED,
                NVCV_GPU,
                0,
                &mut ptr,
            )
        };
        check_resource(self, rc, "NvCVImage_Create")?;
        let id = self.mint();
        self.images.lock().unwrap().insert(id, RawPtr(ptr));
        Ok(ImageHandle(id))
    }
}

impl AcceleratorApi for VfxAccelerator {
    fn create_effect(&self, effect_id: &str) -> Result<EffectHandle> {
        let api = vfx_api()?;
        let cid = CString::new(effect_id).map_err(|_| {
            MatteError::InvariantViolation(format!("effect id contains NUL: {effect_id:?}"))
        })?;
        let mut handle: NvHandle = std::ptr::null_mut();
        // SAFETY: cid is NUL-terminated and the out pointer is valid.
        let rc = unsafe { (api.vfx_create_effect)(cid.as_ptr(), &mut handle) };
        check_provider(self, rc, "NvVFX_CreateEffect")?;
        let id = self.mint();
        self.effects.lock().unwrap().insert(id, RawPtr(handle));
        Ok(EffectHandle(id))
    }

    fn destroy_effect(&self, effect: EffectHandle) {
        let Some(ptr) = self.effects.lock().unwrap().remove(&effect.0) else {
            return;
        };
        let Ok(api) = vfx_api() else { return };
        // SAFETY: ptr came from NvVFX_CreateEffect and is removed from the
        // registry before destruction, so it cannot be used again.
        let rc = unsafe { (api.vfx_destroy_effect)(ptr.0) };
        if rc != 0 {
            warn!(code = rc, "NvVFX_DestroyEffect failed");
        }
    }

    fn set_stream(&self, effect: EffectHandle, stream: StreamHandle) -> Result<()> {
        let api = vfx_api()?;
        let (eptr, sptr) = (self.effect_ptr(effect)?, self.stream_ptr(stream)?);
        // SAFETY: both pointers come from the registries; the selector is a
        // static NUL-terminated string.
        let rc = unsafe { (api.vfx_set_cuda_stream)(eptr, PARAM_CUDA_STREAM.as_ptr(), sptr) };
        check_provider(self, rc, "NvVFX_SetCudaStream")
    }

    fn set_model_dir(&self, effect: EffectHandle, dir: &Path) -> Result<()> {
        let api = vfx_api()?;
        let eptr = self.effect_ptr(effect)?;
        let cdir = CString::new(dir.as_os_str().as_encoded_bytes()).map_err(|_| {
            MatteError::InvariantViolation(format!("model path contains NUL: {}", dir.display()))
        })?;
        // SAFETY: registry pointer plus two NUL-terminated strings.
        let rc = unsafe { (api.vfx_set_string)(eptr, PARAM_MODEL_DIR.as_ptr(), cdir.as_ptr()) };
        check_provider(self, rc, "NvVFX_SetString")
    }

    fn set_mode(&self, effect: EffectHandle, mode: u32) -> Result<()> {
        let api = vfx_api()?;
        let eptr = self.effect_ptr(effect)?;
        // SAFETY: registry pointer and static selector string.
        let rc = unsafe { (api.vfx_set_u32)(eptr, PARAM_MODE.as_ptr(), mode) };
        check_provider(self, rc, "NvVFX_SetU32")
    }

    fn bind_input(&self, effect: EffectHandle, image: ImageHandle) -> Result<()> {
        let api = vfx_api()?;
        let (eptr, iptr) = (self.effect_ptr(effect)?, self.image_ptr(image)?);
        // SAFETY: both pointers come from the registries.
        let rc = unsafe { (api.vfx_set_image)(eptr, PARAM_SRC_IMAGE.as_ptr(), iptr) };
        check_provider(self, rc, "NvVFX_SetImage")
    }

    fn bind_output(&self, effect: EffectHandle, image: ImageHandle) -> Result<()> {
        let api = vfx_api()?;
        let (eptr, iptr) = (self.effect_ptr(effect)?, self.image_ptr(image)?);
        // SAFETY: both pointers come from the registries.
        let rc = unsafe { (api.vfx_set_image)(eptr, PARAM_DST_IMAGE.as_ptr(), iptr) };
        check_provider(self, rc, "NvVFX_SetImage")
    }

    fn load_effect(&self, effect: EffectHandle) -> Result<()> {
        let api = vfx_api()?;
        let eptr = self.effect_ptr(effect)?;
        // SAFETY: registry pointer from NvVFX_CreateEffect.
        let rc = unsafe { (api.vfx_load)(eptr) };
        check_provider(self, rc, "NvVFX_Load")
    }

    fn run_effect(&self, effect: EffectHandle) -> Result<()> {
        let api = vfx_api()?;
        let eptr = self.effect_ptr(effect)?;
        // SAFETY: registry pointer; 0 requests synchronous queueing.
        let rc = unsafe { (api.vfx_run)(eptr, 0) };
        check_provider(self, rc, "NvVFX_Run")
    }

    fn alloc_image(&self, size: Size, format: TextureFormat) -> Result<ImageHandle> {
        self.create_image(size, format)
    }

    fn dealloc_image(&self, image: ImageHandle) -> Result<()> {
        let ptr = self
            .images
            .lock()
            .unwrap()
            .remove(&image.0)
            .ok_or_else(|| {
                MatteError::InvariantViolation(format!("unknown image handle {}", image.0))
            })?;
        let api = vfx_api()?;
        // SAFETY: ptr came from NvCVImage_Create and was just removed from
        // the registry.
        let rc = unsafe { (api.cv_image_destroy)(ptr.0) };
        check_resource(self, rc, "NvCVImage_Destroy")
    }

    fn wrap_texture(&self, _texture: &TextureHandle) -> Result<ImageHandle> {
        // The image library only wraps D3D textures; there is no supported
        // interop for this platform's host textures, and a detached device
        // image would silently feed the effect uninitialized memory.
        // TODO: add explicit upload/download calls to HostCompositor so
        // frames can cross the texture/image boundary through host-visible
        // staging.
        Err(MatteError::Unavailable(
            "GPU texture interop is not implemented on this platform; \
host textures cannot reach the effects runtime"
                .into(),
        ))
    }

    fn map_image(&self, _image: ImageHandle) -> Result<()> {
        // Only wrapped textures are mapped, and wrapping never succeeds on
        // this backend.
        Ok(())
    }

    fn unmap_image(&self, _image: ImageHandle) -> Result<()> {
        Ok(())
    }

    fn transfer(
        &self,
        src: ImageHandle,
        dst: ImageHandle,
        scale: f32,
        stream: StreamHandle,
        staging: Option<ImageHandle>,
    ) -> Result<()> {
        let api = vfx_api()?;
        let sptr = self.image_ptr(src)?;
        let dptr = self.image_ptr(dst)?;
        let cu = self.stream_ptr(stream)?;
        let tmp = match staging {
            Some(image) => self.image_ptr(image)?,
            None => std::ptr::null_mut(),
        };
        // SAFETY: all pointers come from the registries; null tmp asks the
        // library to allocate its own staging if needed.
        let rc = unsafe { (api.cv_transfer)(sptr, dptr, scale, cu, tmp) };
        check_resource(self, rc, "NvCVImage_Transfer")
    }

    fn create_stream(&self) -> Result<StreamHandle> {
        let api = vfx_api()?;
        let mut stream: CuStream = std::ptr::null_mut();
        // SAFETY: valid out pointer.
        let rc = unsafe { (api.vfx_stream_create)(&mut stream) };
        check_resource(self, rc, "NvVFX_CudaStreamCreate")?;
        let id = self.mint();
        self.streams.lock().unwrap().insert(id, RawPtr(stream));
        Ok(StreamHandle(id))
    }

    fn destroy_stream(&self, stream: StreamHandle) {
        let Some(ptr) = self.streams.lock().unwrap().remove(&stream.0) else {
            return;
        };
        let Ok(api) = vfx_api() else { return };
        // SAFETY: ptr came from NvVFX_CudaStreamCreate and was removed from
        // the registry.
        let rc = unsafe { (api.vfx_stream_destroy)(ptr.0) };
        if rc != 0 {
            warn!(code = rc, "NvVFX_CudaStreamDestroy failed");
        }
    }

    fn sync_stream(&self, stream: StreamHandle) -> Result<()> {
        let api = vfx_api()?;
        let cu = self.stream_ptr(stream)?;
        // SAFETY: registry pointer for a live stream.
        let rc = unsafe { (api.cu_stream_synchronize)(cu) };
        if rc == 0 {
            Ok(())
        } else {
            Err(MatteError::Resource {
                call: "cuStreamSynchronize",
                code: rc,
                detail: format!("CUDA error code {rc}"),
            })
        }
    }

    fn error_string(&self, code: i32) -> String {
        let Ok(api) = vfx_api() else {
            return format!("status {code}");
        };
        // SAFETY: the library returns a static string for any code.
        let ptr = unsafe { (api.cv_error_string)(code) };
        if ptr.is_null() {
            format!("status {code}")
        } else {
            // SAFETY: non-null return is a valid NUL-terminated string.
            unsafe { CStr::from_ptr(ptr) }.to_string_lossy().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    use matte_core::{MatteError, Size, TextureFormat, TextureHandle};

    use super::VfxAccelerator;
    use crate::api::AcceleratorApi;

    fn accelerator() -> VfxAccelerator {
        VfxAccelerator {
            effects: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    #[test]
    fn wrap_texture_reports_missing_interop() {
        let api = accelerator();
        let texture = TextureHandle {
            id: 7,
            size: Size::new(64, 64),
            format: TextureFormat::Rgba8,
        };
        assert!(matches!(
            api.wrap_texture(&texture),
            Err(MatteError::Unavailable(_))
        ));
    }
}
